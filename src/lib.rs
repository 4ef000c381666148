pub mod aggregator;
pub mod detector;
pub mod event_log;
pub mod probe;
pub mod projection;
pub mod retention;
pub mod tailer;
pub mod tracker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};

/// Event type under which status transitions are persisted to the durable log.
pub const STATUS_CHANGE_EVENT: &str = "service_status_change";

/// The observed status of a service.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Up,
    Down,
    Degraded,
}

impl ServiceStatus {
    #[must_use]
    pub fn is_up(self) -> bool {
        matches!(self, Self::Up)
    }
}

impl Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Up => write!(f, "up"),
            Self::Down => write!(f, "down"),
            Self::Degraded => write!(f, "degraded"),
        }
    }
}

/// Diagnostic context attached to an observation.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_grade: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StatusMetadata {
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

/// One observed status interval. The most recent record per service is
/// normally open-ended (`duration` unset) until the next transition
/// finalizes it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UptimeRecord {
    pub id: String,
    pub service_name: String,
    pub status: ServiceStatus,
    pub timestamp: DateTime<Utc>,
    /// Milliseconds until the next transition, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<StatusMetadata>,
}

static RECORD_SEQ: AtomicU64 = AtomicU64::new(0);

impl UptimeRecord {
    /// A fresh open-ended record for a transition observed at `timestamp`.
    /// Ids are unique per process; records authored elsewhere arrive with
    /// their own ids via the durable log.
    #[must_use]
    pub fn open(
        service_name: impl Into<String>,
        status: ServiceStatus,
        metadata: StatusMetadata,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let service_name = service_name.into();
        let seq = RECORD_SEQ.fetch_add(1, Ordering::Relaxed);
        let id = format!("{service_name}-{}-{seq}", timestamp.timestamp_millis());
        Self {
            id,
            service_name,
            status,
            timestamp,
            duration: None,
            metadata: Some(metadata),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.duration.is_none()
    }
}
