//! Metric and log export.
//!
//! Two independent encoders over the same result batches: Prometheus remote
//! write (metrics-push, with a one-shot JSON fallback) and Loki (log-push).
//! Each path is enabled solely by the presence of its credentials in the
//! environment; absent credentials are a logged skip, never an error, and no
//! export failure invalidates already-persisted results.

mod loki;
mod prometheus;

pub use loki::*;
pub use prometheus::*;

use crate::flow::SyntheticFlowResult;
use crate::probe::ProbeResult;

use std::collections::BTreeMap;
use thiserror::Error;

/// Export error types. Always recovered at the run level.
#[derive(Error, Debug)]
pub enum ExportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("backend rejected push: status {0}")]
    Backend(u16),
    #[error("encoding error: {0}")]
    Encode(String),
}

/// Which result source a batch came from; becomes the `kind` stream label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultKind {
    Uptime,
    Synthetic,
}

impl ResultKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultKind::Uptime => "uptime",
            ResultKind::Synthetic => "synthetic",
        }
    }
}

/// One named, labeled, timestamped numeric sample. Transient: derived for
/// export only, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub name: String,
    pub value: f64,
    /// Unique keys; BTreeMap keeps the wire order deterministic.
    pub labels: BTreeMap<String, String>,
    pub timestamp_ms: i64,
}

impl MetricSample {
    fn new(name: &str, value: f64, labels: &BTreeMap<String, String>, timestamp_ms: i64) -> Self {
        Self {
            name: name.to_string(),
            value,
            labels: labels.clone(),
            timestamp_ms,
        }
    }
}

pub const METRIC_UPTIME_STATUS: &str = "flowsentry_uptime_status";
pub const METRIC_RESPONSE_TIME_SECONDS: &str = "flowsentry_response_time_seconds";
pub const METRIC_HTTP_STATUS_CODE: &str = "flowsentry_http_status_code";
pub const METRIC_CHECKS_TOTAL: &str = "flowsentry_checks_total";
pub const METRIC_SYNTHETIC_SUCCESS: &str = "flowsentry_synthetic_success";
pub const METRIC_SYNTHETIC_DURATION_SECONDS: &str = "flowsentry_synthetic_duration_seconds";
pub const METRIC_SYNTHETIC_FLOWS_TOTAL: &str = "flowsentry_synthetic_flows_total";

fn outcome_label(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

/// Derive the fixed sample vocabulary for one probe result.
pub fn probe_samples(result: &ProbeResult, region: &str) -> Vec<MetricSample> {
    let mut labels = BTreeMap::new();
    labels.insert("client".to_string(), result.client.clone());
    labels.insert("domain".to_string(), result.domain.clone());
    labels.insert("url".to_string(), result.url.clone());
    labels.insert("path".to_string(), result.path.clone());
    labels.insert("region".to_string(), region.to_string());
    let ts = result.timestamp.timestamp_millis();

    let mut samples = vec![
        MetricSample::new(
            METRIC_UPTIME_STATUS,
            if result.success { 1.0 } else { 0.0 },
            &labels,
            ts,
        ),
        MetricSample::new(
            METRIC_RESPONSE_TIME_SECONDS,
            result.response_time_ms as f64 / 1000.0,
            &labels,
            ts,
        ),
        MetricSample::new(
            METRIC_HTTP_STATUS_CODE,
            result.http_status as f64,
            &labels,
            ts,
        ),
    ];

    labels.insert(
        "status".to_string(),
        outcome_label(result.success).to_string(),
    );
    samples.push(MetricSample::new(METRIC_CHECKS_TOTAL, 1.0, &labels, ts));
    samples
}

/// Derive the fixed sample vocabulary for one synthetic flow result.
pub fn flow_samples(result: &SyntheticFlowResult, region: &str) -> Vec<MetricSample> {
    let mut labels = BTreeMap::new();
    labels.insert("client".to_string(), result.client.clone());
    labels.insert("domain".to_string(), result.domain.clone());
    labels.insert("flow".to_string(), "checkout".to_string());
    labels.insert("region".to_string(), region.to_string());
    let ts = result.timestamp.timestamp_millis();

    let mut samples = vec![
        MetricSample::new(
            METRIC_SYNTHETIC_SUCCESS,
            if result.success { 1.0 } else { 0.0 },
            &labels,
            ts,
        ),
        MetricSample::new(
            METRIC_SYNTHETIC_DURATION_SECONDS,
            result.duration_ms as f64 / 1000.0,
            &labels,
            ts,
        ),
    ];

    labels.insert(
        "status".to_string(),
        outcome_label(result.success).to_string(),
    );
    samples.push(MetricSample::new(
        METRIC_SYNTHETIC_FLOWS_TOTAL,
        1.0,
        &labels,
        ts,
    ));
    samples
}

/// Export facade over the two backend encoders. A `None` encoder means its
/// credentials were absent and that path is skipped.
pub struct Exporter {
    prometheus: Option<PrometheusPush>,
    loki: Option<LokiPush>,
    region: String,
}

impl Exporter {
    pub fn new(prometheus: Option<PrometheusPush>, loki: Option<LokiPush>, region: &str) -> Self {
        Self {
            prometheus,
            loki,
            region: region.to_string(),
        }
    }

    /// Build from the credential environment variables. Absence of either
    /// credential set only disables that path.
    pub fn from_env(region: &str) -> Self {
        let prometheus = PrometheusPush::from_env();
        if prometheus.is_none() {
            tracing::info!("Prometheus credentials not found, skipping metrics push");
        }
        let loki = LokiPush::from_env();
        if loki.is_none() {
            tracing::info!("Loki credentials not found, skipping log push");
        }
        Self::new(prometheus, loki, region)
    }

    pub fn metrics_enabled(&self) -> bool {
        self.prometheus.is_some()
    }

    pub fn logs_enabled(&self) -> bool {
        self.loki.is_some()
    }

    /// Export one probe batch to both backends. Failures are logged and
    /// swallowed; persisted results are already on disk.
    pub async fn export_probes(&self, results: &[ProbeResult]) {
        if results.is_empty() {
            return;
        }

        let samples: Vec<MetricSample> = results
            .iter()
            .flat_map(|r| probe_samples(r, &self.region))
            .collect();
        self.push_metrics(ResultKind::Uptime, samples).await;

        let entries: Vec<LokiEntry> = results
            .iter()
            .map(|r| LokiEntry::from_record(r.timestamp, r, ResultKind::Uptime))
            .collect();
        self.push_logs(ResultKind::Uptime, entries).await;
    }

    /// Export one synthetic batch to both backends.
    pub async fn export_flows(&self, results: &[SyntheticFlowResult]) {
        if results.is_empty() {
            return;
        }

        let samples: Vec<MetricSample> = results
            .iter()
            .flat_map(|r| flow_samples(r, &self.region))
            .collect();
        self.push_metrics(ResultKind::Synthetic, samples).await;

        let entries: Vec<LokiEntry> = results
            .iter()
            .map(|r| LokiEntry::from_record(r.timestamp, r, ResultKind::Synthetic))
            .collect();
        self.push_logs(ResultKind::Synthetic, entries).await;
    }

    async fn push_metrics(&self, kind: ResultKind, samples: Vec<MetricSample>) {
        let Some(prometheus) = &self.prometheus else {
            tracing::debug!(kind = kind.as_str(), "metrics push disabled");
            return;
        };
        match prometheus.push(&samples).await {
            Ok(()) => {
                tracing::info!(kind = kind.as_str(), count = samples.len(), "metrics pushed")
            }
            Err(e) => {
                tracing::error!(kind = kind.as_str(), error = %e, "failed to push metrics")
            }
        }
    }

    async fn push_logs(&self, kind: ResultKind, entries: Vec<LokiEntry>) {
        let Some(loki) = &self.loki else {
            tracing::debug!(kind = kind.as_str(), "log push disabled");
            return;
        };
        match loki.push(kind, &self.region, &entries).await {
            Ok(()) => {
                tracing::info!(kind = kind.as_str(), count = entries.len(), "log entries pushed")
            }
            Err(e) => {
                tracing::error!(kind = kind.as_str(), error = %e, "failed to push log entries")
            }
        }
    }
}
