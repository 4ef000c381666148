//! Boundary to the durable append-only event store.
//!
//! The real store lives in another process; this crate only depends on the
//! `EventLog` trait. `MemoryEventLog` is the in-process stand-in used by the
//! tests and the demo binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;

/// Per-stream sequence number of an event.
pub type Position = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadDirection {
    Forward,
    Backward,
}

/// An event to be appended.
#[derive(Debug, Clone)]
pub struct EventData {
    pub event_type: String,
    pub data: Value,
    pub metadata: Option<Value>,
}

/// An event as read back from a stream.
#[derive(Debug, Clone)]
pub struct RecordedEvent {
    pub id: String,
    pub event_type: String,
    pub data: Value,
    pub metadata: Option<Value>,
    pub position: Position,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AppendResult {
    pub event_id: String,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct ReadOptions {
    /// First position to return; `None` starts at the beginning (forward)
    /// or the end (backward) of the stream.
    pub from: Option<Position>,
    pub direction: ReadDirection,
    pub max_count: usize,
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("append to stream {stream} failed: {reason}")]
    AppendFailed { stream: String, reason: String },
    #[error("read from stream {stream} failed: {reason}")]
    ReadFailed { stream: String, reason: String },
}

#[async_trait]
pub trait EventLog: Send + Sync {
    async fn append(&self, stream: &str, event: EventData) -> Result<AppendResult, EventLogError>;

    async fn read(
        &self,
        stream: &str,
        options: ReadOptions,
    ) -> Result<Vec<RecordedEvent>, EventLogError>;
}

/// In-memory append-only log with per-stream 0-based positions.
#[derive(Default)]
pub struct MemoryEventLog {
    streams: Mutex<BTreeMap<String, Vec<RecordedEvent>>>,
}

impl MemoryEventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // An append-only map stays consistent even if a writer panicked, so
    // poisoning is recovered rather than surfaced.
    fn streams(&self) -> MutexGuard<'_, BTreeMap<String, Vec<RecordedEvent>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of events in a stream, mainly for test assertions.
    pub fn stream_len(&self, stream: &str) -> usize {
        self.streams().get(stream).map_or(0, Vec::len)
    }
}

#[async_trait]
impl EventLog for MemoryEventLog {
    async fn append(&self, stream: &str, event: EventData) -> Result<AppendResult, EventLogError> {
        let mut streams = self.streams();
        let events = streams.entry(stream.to_string()).or_default();
        let position = events.len() as Position;
        let id = format!("{stream}:{position}");
        events.push(RecordedEvent {
            id: id.clone(),
            event_type: event.event_type,
            data: event.data,
            metadata: event.metadata,
            position,
            timestamp: Utc::now(),
        });
        Ok(AppendResult {
            event_id: id,
            position,
        })
    }

    async fn read(
        &self,
        stream: &str,
        options: ReadOptions,
    ) -> Result<Vec<RecordedEvent>, EventLogError> {
        let streams = self.streams();
        let Some(events) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        let selected: Vec<RecordedEvent> = match options.direction {
            ReadDirection::Forward => {
                let from = options.from.unwrap_or(0) as usize;
                events
                    .iter()
                    .filter(|e| e.position as usize >= from)
                    .take(options.max_count)
                    .cloned()
                    .collect()
            }
            ReadDirection::Backward => {
                let from = options.from.map_or(events.len(), |p| p as usize + 1);
                events[..from.min(events.len())]
                    .iter()
                    .rev()
                    .take(options.max_count)
                    .cloned()
                    .collect()
            }
        };
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(n: u64) -> EventData {
        EventData {
            event_type: "service_status_change".to_string(),
            data: json!({ "n": n }),
            metadata: None,
        }
    }

    #[tokio::test]
    async fn append_assigns_sequential_positions() {
        let log = MemoryEventLog::new();
        for n in 0..3 {
            let res = log.append("svc:http", event(n)).await.unwrap();
            assert_eq!(res.position, n);
        }
        assert_eq!(log.stream_len("svc:http"), 3);
    }

    #[tokio::test]
    async fn forward_read_starts_at_from_position() {
        let log = MemoryEventLog::new();
        for n in 0..5 {
            log.append("svc:http", event(n)).await.unwrap();
        }
        let events = log
            .read(
                "svc:http",
                ReadOptions {
                    from: Some(2),
                    direction: ReadDirection::Forward,
                    max_count: 100,
                },
            )
            .await
            .unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].position, 2);
        assert_eq!(events[2].position, 4);
    }

    #[tokio::test]
    async fn backward_read_returns_newest_first() {
        let log = MemoryEventLog::new();
        for n in 0..5 {
            log.append("svc:http", event(n)).await.unwrap();
        }
        let events = log
            .read(
                "svc:http",
                ReadOptions {
                    from: None,
                    direction: ReadDirection::Backward,
                    max_count: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].position, 4);
        assert_eq!(events[1].position, 3);
    }

    #[tokio::test]
    async fn unknown_stream_reads_empty() {
        let log = MemoryEventLog::new();
        let events = log
            .read(
                "svc:nope",
                ReadOptions {
                    from: None,
                    direction: ReadDirection::Forward,
                    max_count: 10,
                },
            )
            .await
            .unwrap();
        assert!(events.is_empty());
    }
}
