//! Configuration module for FlowSentry.
//!
//! Loads the monitored-site registry from a JSON file and run settings from
//! environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Configuration error types. Any of these is fatal at startup.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read site config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed site config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid site entry: {0}")]
    Invalid(String),
}

/// A single URL to probe under a site, addressed by logical name.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlSpec {
    pub name: String,
    pub path: String,
}

/// DOM selector hints for the synthetic checkout flow. Each hint is
/// optional; a missing hint means the corresponding step is not attempted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyntheticSelectors {
    #[serde(default)]
    pub product_link: Option<String>,
    #[serde(default)]
    pub add_to_cart: Option<String>,
    #[serde(default)]
    pub proceed_checkout: Option<String>,
}

/// Synthetic flow settings for a site.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyntheticSpec {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub selectors: SyntheticSelectors,
}

/// A monitored site: one client, one domain, a set of probe URLs and an
/// optional synthetic flow block. Immutable once loaded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteDescriptor {
    pub client: String,
    pub domain: String,
    pub urls: Vec<UrlSpec>,
    #[serde(default)]
    pub synthetic: Option<SyntheticSpec>,
}

impl SiteDescriptor {
    /// Whether the synthetic checkout flow should run for this site.
    pub fn synthetic_enabled(&self) -> bool {
        self.synthetic.as_ref().map(|s| s.enabled).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SiteFile {
    sites: Vec<SiteDescriptor>,
}

/// Ordered, read-only collection of target sites for one run.
#[derive(Debug, Clone)]
pub struct SiteRegistry {
    pub sites: Vec<SiteDescriptor>,
}

impl SiteRegistry {
    /// Load and validate the site registry from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        let file: SiteFile = serde_json::from_str(&raw)?;
        let registry = Self { sites: file.sites };
        registry.validate()?;
        Ok(registry)
    }

    /// Parse a registry from an in-memory JSON document.
    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        let file: SiteFile = serde_json::from_str(raw)?;
        let registry = Self { sites: file.sites };
        registry.validate()?;
        Ok(registry)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for site in &self.sites {
            if site.client.is_empty() {
                return Err(ConfigError::Invalid("site with empty client id".into()));
            }
            if site.domain.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "site {} has empty domain",
                    site.client
                )));
            }
        }
        Ok(())
    }
}

/// Run configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Path to the site registry JSON (default: "config/sites.json")
    pub sites_path: PathBuf,
    /// Directory for persisted result files (default: "results")
    pub results_dir: PathBuf,
    /// Directory for failure screenshots (default: "screenshots")
    pub screenshots_dir: PathBuf,
    /// Region label attached to every exported sample (default: "github-actions")
    pub region: String,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            sites_path: PathBuf::from("config/sites.json"),
            results_dir: PathBuf::from("results"),
            screenshots_dir: PathBuf::from("screenshots"),
            region: "github-actions".to_string(),
        }
    }
}

impl RunConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `FLOWSENTRY_SITES_PATH`: site registry JSON path
    /// - `FLOWSENTRY_RESULTS_DIR`: result file directory
    /// - `FLOWSENTRY_SCREENSHOTS_DIR`: failure artifact directory
    /// - `FLOWSENTRY_REGION`: region label for exported samples
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(path) = env::var("FLOWSENTRY_SITES_PATH") {
            cfg.sites_path = PathBuf::from(path);
        }
        if let Ok(dir) = env::var("FLOWSENTRY_RESULTS_DIR") {
            cfg.results_dir = PathBuf::from(dir);
        }
        if let Ok(dir) = env::var("FLOWSENTRY_SCREENSHOTS_DIR") {
            cfg.screenshots_dir = PathBuf::from(dir);
        }
        if let Ok(region) = env::var("FLOWSENTRY_REGION") {
            cfg.region = region;
        }

        cfg
    }
}
