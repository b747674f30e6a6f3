//! Prometheus remote-write push.
//!
//! Primary encoding is the remote-write protobuf body, snappy-compressed.
//! If that delivery fails for any reason, the same samples are re-sent once
//! as a plain JSON body, then the push gives up. Bearer and basic auth are
//! both supported.

use super::{ExportError, MetricSample};
use std::env;
use std::time::Duration;

const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Remote-write protobuf messages (prometheus.WriteRequest subset).
pub mod wire {
    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Label {
        #[prost(string, tag = "1")]
        pub name: String,
        #[prost(string, tag = "2")]
        pub value: String,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct Sample {
        #[prost(double, tag = "1")]
        pub value: f64,
        /// Milliseconds since epoch.
        #[prost(int64, tag = "2")]
        pub timestamp: i64,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct TimeSeries {
        #[prost(message, repeated, tag = "1")]
        pub labels: Vec<Label>,
        #[prost(message, repeated, tag = "2")]
        pub samples: Vec<Sample>,
    }

    #[derive(Clone, PartialEq, prost::Message)]
    pub struct WriteRequest {
        #[prost(message, repeated, tag = "1")]
        pub timeseries: Vec<TimeSeries>,
    }
}

/// Authentication for the metrics endpoint.
#[derive(Debug, Clone)]
pub enum PushAuth {
    Bearer(String),
    Basic { username: String, password: String },
}

/// Encode samples as a snappy-compressed remote-write body. Labels go out
/// sorted by name with `__name__` first, as remote write requires.
pub fn encode_remote_write(samples: &[MetricSample]) -> Result<Vec<u8>, ExportError> {
    use prost::Message;

    let timeseries = samples
        .iter()
        .map(|sample| {
            let mut labels = vec![wire::Label {
                name: "__name__".to_string(),
                value: sample.name.clone(),
            }];
            // BTreeMap iteration is already name-sorted; every label name
            // sorts after "__name__".
            labels.extend(sample.labels.iter().map(|(name, value)| wire::Label {
                name: name.clone(),
                value: value.clone(),
            }));
            wire::TimeSeries {
                labels,
                samples: vec![wire::Sample {
                    value: sample.value,
                    timestamp: sample.timestamp_ms,
                }],
            }
        })
        .collect();

    let request = wire::WriteRequest { timeseries };
    let mut buf = Vec::with_capacity(request.encoded_len());
    request
        .encode(&mut buf)
        .map_err(|e| ExportError::Encode(e.to_string()))?;

    snap::raw::Encoder::new()
        .compress_vec(&buf)
        .map_err(|e| ExportError::Encode(e.to_string()))
}

/// Encode samples as the fallback JSON body.
pub fn encode_json(samples: &[MetricSample]) -> serde_json::Value {
    let series: Vec<serde_json::Value> = samples
        .iter()
        .map(|sample| {
            let mut metric = serde_json::Map::new();
            metric.insert(
                "__name__".to_string(),
                serde_json::Value::String(sample.name.clone()),
            );
            for (name, value) in &sample.labels {
                metric.insert(name.clone(), serde_json::Value::String(value.clone()));
            }
            serde_json::json!({
                "metric": metric,
                "value": [sample.timestamp_ms, sample.value.to_string()],
            })
        })
        .collect();

    serde_json::json!({ "timeSeries": series })
}

/// Metrics-push client for one endpoint.
pub struct PrometheusPush {
    endpoint: String,
    auth: PushAuth,
    client: reqwest::Client,
}

impl PrometheusPush {
    pub fn new(endpoint: &str, auth: PushAuth) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            auth,
            client: reqwest::Client::new(),
        }
    }

    /// Build from the environment, if credentials are present:
    /// `GRAFANA_PROMETHEUS_URL` plus `GRAFANA_API_KEY`, with
    /// `GRAFANA_PROMETHEUS_USER` switching bearer auth to basic.
    pub fn from_env() -> Option<Self> {
        let endpoint = env::var("GRAFANA_PROMETHEUS_URL").ok()?;
        let key = env::var("GRAFANA_API_KEY").ok()?;
        let auth = match env::var("GRAFANA_PROMETHEUS_USER") {
            Ok(username) => PushAuth::Basic {
                username,
                password: key,
            },
            Err(_) => PushAuth::Bearer(key),
        };
        Some(Self::new(&endpoint, auth))
    }

    /// One POST per batch; on delivery failure, exactly one fallback POST
    /// with the JSON encoding, then give up.
    pub async fn push(&self, samples: &[MetricSample]) -> Result<(), ExportError> {
        match self.push_remote_write(samples).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "remote-write push failed, trying JSON fallback");
                self.push_json(samples).await
            }
        }
    }

    async fn push_remote_write(&self, samples: &[MetricSample]) -> Result<(), ExportError> {
        let body = encode_remote_write(samples)?;
        let request = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/x-protobuf")
            .header("Content-Encoding", "snappy")
            .header("X-Prometheus-Remote-Write-Version", "0.1.0")
            .timeout(PUSH_TIMEOUT)
            .body(body);
        self.send(request).await
    }

    async fn push_json(&self, samples: &[MetricSample]) -> Result<(), ExportError> {
        let request = self
            .client
            .post(&self.endpoint)
            .timeout(PUSH_TIMEOUT)
            .json(&encode_json(samples));
        self.send(request).await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(), ExportError> {
        let request = match &self.auth {
            PushAuth::Bearer(token) => request.bearer_auth(token),
            PushAuth::Basic { username, password } => {
                request.basic_auth(username, Some(password))
            }
        };
        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ExportError::Backend(status.as_u16()))
        }
    }
}
