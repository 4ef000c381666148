//! Health probes.
//!
//! A probe never errors: transport failures and timeouts resolve to `down`,
//! slow or non-2xx responses to `degraded`, with the cause carried in
//! metadata. The detector only ever sees a resolved status.

use crate::{ServiceStatus, StatusMetadata};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub status: ServiceStatus,
    pub metadata: StatusMetadata,
}

impl ProbeOutcome {
    #[must_use]
    pub fn down(error: impl Into<String>) -> Self {
        Self {
            status: ServiceStatus::Down,
            metadata: StatusMetadata::error(error),
        }
    }
}

#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, service_name: &str) -> ProbeOutcome;
}

/// Response times above this are graded `poor` and the service is reported
/// degraded even on a successful response.
const DEGRADED_THRESHOLD_MS: u64 = 2000;

fn performance_grade(response_time_ms: u64) -> &'static str {
    match response_time_ms {
        0..=199 => "excellent",
        200..=499 => "good",
        500..=1999 => "fair",
        _ => "poor",
    }
}

/// HTTP GET probe over a fixed set of targets.
pub struct HttpProbe {
    client: reqwest::Client,
    targets: BTreeMap<String, String>,
}

impl HttpProbe {
    /// `targets` maps service name to URL. `timeout` bounds each request so
    /// one slow service never stalls a probe cycle.
    pub fn new(
        targets: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, targets })
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn probe(&self, service_name: &str) -> ProbeOutcome {
        let Some(url) = self.targets.get(service_name) else {
            return ProbeOutcome::down(format!("no probe target for {service_name}"));
        };
        let started = Instant::now();
        match self.client.get(url).send().await {
            Ok(response) => {
                let response_time_ms = started.elapsed().as_millis() as u64;
                let grade = performance_grade(response_time_ms);
                let metadata = StatusMetadata {
                    response_time_ms: Some(response_time_ms),
                    performance_grade: Some(grade.to_string()),
                    ..StatusMetadata::default()
                };
                let http_status = response.status();
                if !(http_status.is_success() || http_status.is_redirection()) {
                    ProbeOutcome {
                        status: ServiceStatus::Degraded,
                        metadata: StatusMetadata {
                            error: Some(format!("unexpected status {http_status}")),
                            ..metadata
                        },
                    }
                } else if response_time_ms >= DEGRADED_THRESHOLD_MS {
                    ProbeOutcome {
                        status: ServiceStatus::Degraded,
                        metadata,
                    }
                } else {
                    ProbeOutcome {
                        status: ServiceStatus::Up,
                        metadata,
                    }
                }
            }
            Err(error) => ProbeOutcome::down(error.to_string()),
        }
    }
}
