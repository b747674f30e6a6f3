//! Availability probes.
//!
//! One probe is one navigation to `https://{domain}{path}` through a fresh
//! browser session. Probes never fail the run: every outcome, including
//! timeouts and DNS errors, becomes a [`ProbeResult`].

use crate::browser::{Browser, NavigationWait, PageSession};
use crate::config::{SiteDescriptor, SiteRegistry};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Hard bound on a single probe navigation.
const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one URL check. Immutable once created; appended to the run's
/// result list and persisted as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub client: String,
    /// Logical URL name from the site config.
    pub url: String,
    pub domain: String,
    pub path: String,
    /// HTTP status of the navigation, 0 if the request never completed.
    pub http_status: u16,
    pub response_time_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Success is a pure function of the observed status: a status was obtained
/// and it is below 400.
pub fn is_success(http_status: u16) -> bool {
    http_status != 0 && http_status < 400
}

/// Runs availability checks site by site, URL by URL, strictly sequentially.
pub struct ProbeExecutor<B> {
    browser: B,
    wait: NavigationWait,
}

impl<B: Browser> ProbeExecutor<B> {
    pub fn new(browser: B) -> Self {
        Self {
            browser,
            wait: NavigationWait::bounded(PROBE_TIMEOUT),
        }
    }

    /// Check every URL of every site. One session per probe, released on
    /// every exit path; a failed probe never skips the ones after it.
    pub async fn run(&self, registry: &SiteRegistry) -> Vec<ProbeResult> {
        let mut results = Vec::new();

        for site in &registry.sites {
            tracing::info!(client = %site.client, domain = %site.domain, "checking site");
            for url in &site.urls {
                let result = self.check_url(site, &url.name, &url.path).await;
                if result.success {
                    tracing::info!(
                        url = %url.name,
                        status = result.http_status,
                        ms = result.response_time_ms,
                        "probe ok"
                    );
                } else {
                    tracing::warn!(
                        url = %url.name,
                        error = result.error.as_deref().unwrap_or("-"),
                        "probe failed"
                    );
                }
                results.push(result);
            }
        }

        results
    }

    async fn check_url(&self, site: &SiteDescriptor, name: &str, path: &str) -> ProbeResult {
        let full_url = format!("https://{}{}", site.domain, path);
        let start = Instant::now();

        let outcome = match self.browser.open_session().await {
            Ok(mut session) => session.goto(&full_url, &self.wait).await,
            Err(e) => Err(e),
        };
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(status) => ProbeResult {
                client: site.client.clone(),
                url: name.to_string(),
                domain: site.domain.clone(),
                path: path.to_string(),
                http_status: status,
                response_time_ms: elapsed_ms,
                success: is_success(status),
                error: None,
                timestamp: Utc::now(),
            },
            Err(e) => ProbeResult {
                client: site.client.clone(),
                url: name.to_string(),
                domain: site.domain.clone(),
                path: path.to_string(),
                http_status: 0,
                response_time_ms: elapsed_ms,
                success: false,
                error: Some(e.to_string()),
                timestamp: Utc::now(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::mock::{Script, ScriptedBrowser};
    use std::sync::atomic::Ordering;

    fn registry() -> SiteRegistry {
        SiteRegistry::from_json(
            r#"{
                "sites": [
                    {
                        "client": "acme",
                        "domain": "shop.acme.test",
                        "urls": [
                            { "name": "homepage", "path": "/" },
                            { "name": "catalog", "path": "/products" },
                            { "name": "cart", "path": "/cart" }
                        ]
                    }
                ]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_success_is_pure_function_of_status() {
        assert!(is_success(200));
        assert!(is_success(301));
        assert!(is_success(399));
        assert!(!is_success(400));
        assert!(!is_success(500));
        assert!(!is_success(0));
    }

    #[tokio::test]
    async fn test_probe_run_records_all_urls() {
        let mut script = Script::default();
        script.nav.insert(
            "https://shop.acme.test/products".to_string(),
            Err("dns error".to_string()),
        );
        script
            .nav
            .insert("https://shop.acme.test/cart".to_string(), Ok(503));

        let browser = ScriptedBrowser::new(script);
        let opened = browser.sessions_opened.clone();
        let live = browser.sessions_live.clone();

        let executor = ProbeExecutor::new(browser);
        let results = executor.run(&registry()).await;

        // A failed probe never aborts the ones after it.
        assert_eq!(results.len(), 3);

        assert!(results[0].success);
        assert_eq!(results[0].http_status, 200);

        assert!(!results[1].success);
        assert_eq!(results[1].http_status, 0);
        assert!(results[1].error.as_deref().unwrap().contains("dns error"));

        assert!(!results[2].success);
        assert_eq!(results[2].http_status, 503);
        assert!(results[2].error.is_none());

        // One session per probe, all released.
        assert_eq!(opened.load(Ordering::SeqCst), 3);
        assert_eq!(live.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_probe_failure_invariant() {
        let mut script = Script::default();
        script.nav.insert(
            "https://shop.acme.test/".to_string(),
            Err("connection refused".to_string()),
        );
        let executor = ProbeExecutor::new(ScriptedBrowser::new(script));
        let results = executor.run(&registry()).await;

        for r in &results {
            assert_eq!(r.success, is_success(r.http_status));
        }
    }
}
