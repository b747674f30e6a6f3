//! Run persistence.
//!
//! One monitoring run produces flat JSON files: a dated array of probe
//! results, a dated array of synthetic flow results, a status snapshot for
//! the status-page renderer, and screenshot artifacts for failed flows.
//! Files are written once at the end of the run, never rewritten mid-run.

use crate::flow::SyntheticFlowResult;
use crate::probe::ProbeResult;
use crate::report::AggregatedStatus;

use chrono::Utc;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Storage error types.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes run output under a results directory.
pub struct ResultStore {
    results_dir: PathBuf,
}

impl ResultStore {
    pub fn new<P: Into<PathBuf>>(results_dir: P) -> Self {
        Self {
            results_dir: results_dir.into(),
        }
    }

    /// Persist the probe batch as `uptime-YYYY-MM-DD.json`.
    pub fn save_probe_results(&self, results: &[ProbeResult]) -> Result<PathBuf, StoreError> {
        self.write_json(&self.dated_path("uptime"), results)
    }

    /// Persist the synthetic batch as `synthetic-YYYY-MM-DD.json`.
    pub fn save_flow_results(
        &self,
        results: &[SyntheticFlowResult],
    ) -> Result<PathBuf, StoreError> {
        self.write_json(&self.dated_path("synthetic"), results)
    }

    /// Persist the aggregated snapshot as `status.json` for the status-page
    /// renderer.
    pub fn save_status(&self, statuses: &[AggregatedStatus]) -> Result<PathBuf, StoreError> {
        #[derive(Serialize)]
        struct Snapshot<'a> {
            generated_at: chrono::DateTime<Utc>,
            sites: &'a [AggregatedStatus],
        }

        self.write_json(
            &self.results_dir.join("status.json"),
            &Snapshot {
                generated_at: Utc::now(),
                sites: statuses,
            },
        )
    }

    fn dated_path(&self, prefix: &str) -> PathBuf {
        let stamp = Utc::now().format("%Y-%m-%d");
        self.results_dir.join(format!("{prefix}-{stamp}.json"))
    }

    fn write_json<T: Serialize + ?Sized>(&self, path: &Path, value: &T) -> Result<PathBuf, StoreError> {
        std::fs::create_dir_all(&self.results_dir)?;
        let body = serde_json::to_string_pretty(value)?;
        std::fs::write(path, body)?;
        Ok(path.to_path_buf())
    }
}

/// Write a failure artifact keyed by client and capture time, returning its
/// path for the flow result's `screenshot` reference.
pub fn save_screenshot(dir: &Path, client: &str, bytes: &[u8]) -> Result<PathBuf, StoreError> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(format!("{client}-{}.png", Utc::now().timestamp_millis()));
    std::fs::write(&path, bytes)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample_probe() -> ProbeResult {
        ProbeResult {
            client: "acme".to_string(),
            url: "homepage".to_string(),
            domain: "shop.acme.test".to_string(),
            path: "/".to_string(),
            http_status: 200,
            response_time_ms: 321,
            success: true,
            error: None,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_save_probe_results_dated_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());

        let path = store.save_probe_results(&[sample_probe()]).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("uptime-"));
        assert!(name.ends_with(".json"));

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Vec<ProbeResult> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].client, "acme");
        // Absent errors are omitted, not serialized as null.
        assert!(!raw.contains("\"error\""));
    }

    #[test]
    fn test_save_screenshot_keyed_by_client() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_screenshot(dir.path(), "acme", b"artifact").unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("acme-"));
        assert!(name.ends_with(".png"));
        assert_eq!(std::fs::read(&path).unwrap(), b"artifact");
    }

    #[test]
    fn test_save_status_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::new(dir.path());
        let path = store.save_status(&[]).unwrap();
        let raw = std::fs::read_to_string(path).unwrap();
        assert!(raw.contains("generated_at"));
        assert!(raw.contains("sites"));
    }
}
