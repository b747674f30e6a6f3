//! Loki log push.
//!
//! One stream per batch, keyed by static labels (`job`, `kind`, `region`),
//! one value per result: a nanosecond timestamp string and the full result
//! record JSON-encoded as the log line. Single POST, basic auth, no
//! fallback encoding.

use super::{ExportError, ResultKind};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::env;
use std::time::Duration;

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);
const JOB_LABEL: &str = "flowsentry";

/// One stream value: the result's own capture time plus its serialized
/// record.
#[derive(Debug, Clone)]
pub struct LokiEntry {
    pub timestamp: DateTime<Utc>,
    pub line: String,
}

impl LokiEntry {
    /// Serialize a full result record as the log line, tagged with `kind`.
    pub fn from_record<T: Serialize>(
        timestamp: DateTime<Utc>,
        record: &T,
        kind: ResultKind,
    ) -> Self {
        let mut value = serde_json::to_value(record).unwrap_or_else(|_| serde_json::json!({}));
        if let Some(map) = value.as_object_mut() {
            map.insert(
                "kind".to_string(),
                serde_json::Value::String(kind.as_str().to_string()),
            );
        }
        Self {
            timestamp,
            line: value.to_string(),
        }
    }

    fn nanos(&self) -> i64 {
        self.timestamp
            .timestamp_nanos_opt()
            .unwrap_or_else(|| self.timestamp.timestamp_millis() * 1_000_000)
    }
}

/// Build the push payload: one stream, static labels, per-entry nanosecond
/// timestamps.
pub fn build_payload(kind: ResultKind, region: &str, entries: &[LokiEntry]) -> serde_json::Value {
    serde_json::json!({
        "streams": [{
            "stream": {
                "job": JOB_LABEL,
                "kind": kind.as_str(),
                "region": region,
            },
            "values": entries
                .iter()
                .map(|e| serde_json::json!([e.nanos().to_string(), e.line]))
                .collect::<Vec<_>>(),
        }]
    })
}

/// Log-push client for one endpoint.
pub struct LokiPush {
    endpoint: String,
    username: String,
    password: String,
    client: reqwest::Client,
}

impl LokiPush {
    pub fn new(endpoint: &str, username: &str, password: &str) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            username: username.to_string(),
            password: password.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Build from the environment, if credentials are present:
    /// `GRAFANA_LOKI_URL`, `GRAFANA_LOKI_USER` and `GRAFANA_API_KEY`.
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("GRAFANA_LOKI_URL").ok()?;
        let username = env::var("GRAFANA_LOKI_USER").ok()?;
        let password = env::var("GRAFANA_API_KEY").ok()?;
        Some(Self::new(&endpoint, &username, &password))
    }

    /// Single POST per batch; no retry, no fallback.
    pub async fn push(
        &self,
        kind: ResultKind,
        region: &str,
        entries: &[LokiEntry],
    ) -> Result<(), ExportError> {
        let payload = build_payload(kind, region, entries);
        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.username, Some(&self.password))
            .timeout(PUSH_TIMEOUT)
            .json(&payload)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Backend(status.as_u16()))
        }
    }
}
