//! Per-client availability aggregation.
//!
//! Pure functions over one probe batch: same input, same output, no hidden
//! accumulator state. The output feeds the (external) status-page renderer.

use crate::config::SiteRegistry;
use crate::probe::ProbeResult;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Availability category, by fixed uptime thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    Operational,
    Degraded,
    Outage,
}

/// Map an uptime percentage to its category. Applied to the unrounded
/// percentage, so 94.999 is still an outage.
pub fn categorize(uptime_percent: f64) -> StatusCategory {
    if uptime_percent >= 99.0 {
        StatusCategory::Operational
    } else if uptime_percent >= 95.0 {
        StatusCategory::Degraded
    } else {
        StatusCategory::Outage
    }
}

/// Round to two decimal places for display and persistence.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Up/down flag for one configured URL, from its most recent probe.
#[derive(Debug, Clone, Serialize)]
pub struct UrlStatus {
    pub name: String,
    pub path: String,
    pub up: bool,
}

/// Per-client availability derived from the latest probe batch.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedStatus {
    pub client: String,
    pub domain: String,
    pub uptime_percent: f64,
    pub status: StatusCategory,
    pub last_check: Option<DateTime<Utc>>,
    pub urls: Vec<UrlStatus>,
}

/// Derive per-client statistics from one probe batch. Deterministic and
/// idempotent; a client with no results in the batch reports 0.00 / outage.
pub fn aggregate(registry: &SiteRegistry, results: &[ProbeResult]) -> Vec<AggregatedStatus> {
    registry
        .sites
        .iter()
        .map(|site| {
            let site_results: Vec<&ProbeResult> = results
                .iter()
                .filter(|r| r.client == site.client)
                .collect();

            let total = site_results.len();
            let successes = site_results.iter().filter(|r| r.success).count();
            let percent = if total > 0 {
                successes as f64 / total as f64 * 100.0
            } else {
                0.0
            };

            let urls = site
                .urls
                .iter()
                .map(|url| {
                    let latest = site_results
                        .iter()
                        .filter(|r| r.url == url.name)
                        .max_by_key(|r| r.timestamp);
                    UrlStatus {
                        name: url.name.clone(),
                        path: url.path.clone(),
                        up: latest.map(|r| r.success).unwrap_or(false),
                    }
                })
                .collect();

            AggregatedStatus {
                client: site.client.clone(),
                domain: site.domain.clone(),
                uptime_percent: round2(percent),
                status: categorize(percent),
                last_check: site_results.iter().map(|r| r.timestamp).max(),
                urls,
            }
        })
        .collect()
}
