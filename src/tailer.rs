//! Merging durable-log events into projections.
//!
//! Other process instances append to the same per-service streams; tailing
//! from the saved cursor and merging by id is what keeps every instance's
//! projection eventually convergent. Backoff is coarse: after
//! `MAX_TAIL_ERRORS` consecutive failed reads a stream is skipped entirely
//! until one read succeeds.

use crate::event_log::RecordedEvent;
use crate::projection::ServiceProjection;
use crate::{UptimeRecord, STATUS_CHANGE_EVENT};
use tracing::warn;

/// Consecutive read failures after which a stream is skipped.
pub const MAX_TAIL_ERRORS: u32 = 5;

/// Read batch cap per tail cycle.
pub const TAIL_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Records inserted into the projection.
    pub applied: usize,
    /// Events skipped because their id was already present.
    pub duplicates: usize,
    /// Events dropped as malformed or of a foreign type.
    pub dropped: usize,
}

/// Decode a tailed event into a record. Malformed events (missing required
/// fields) are dropped with a warning; they must not abort the batch.
pub fn parse_status_event(event: &RecordedEvent) -> Option<UptimeRecord> {
    if event.event_type != STATUS_CHANGE_EVENT {
        return None;
    }
    match serde_json::from_value::<UptimeRecord>(event.data.clone()) {
        Ok(record) => Some(record),
        Err(error) => {
            warn!(
                event_id = %event.id,
                position = event.position,
                %error,
                "dropping malformed status event"
            );
            None
        }
    }
}

/// Merge one successfully read batch into a projection. The cursor advances
/// to the last event read whether or not each event was applied, and the
/// error counter resets (the read itself succeeded).
pub fn merge_batch(projection: &mut ServiceProjection, events: &[RecordedEvent]) -> MergeOutcome {
    let mut outcome = MergeOutcome::default();
    for event in events {
        match parse_status_event(event) {
            Some(record) => {
                if projection.merge(record) {
                    outcome.applied += 1;
                } else {
                    outcome.duplicates += 1;
                }
            }
            None => outcome.dropped += 1,
        }
        projection.advance_cursor(event.position);
    }
    projection.reset_tail_errors();
    outcome
}
