//! Status change detection.
//!
//! The probe layer never surfaces errors: a failed or timed-out probe
//! arrives here already resolved to `down` or `degraded` with the error in
//! metadata. The event stream is sparse; steady-state samples produce no
//! records.

use crate::projection::ServiceProjection;
use crate::{ServiceStatus, StatusMetadata, UptimeRecord};
use chrono::{DateTime, Utc};
use tracing::debug;

/// Records produced by one observed transition. Both must be persisted to
/// the durable log (fire-and-forget).
#[derive(Debug, Clone)]
pub struct Transition {
    /// The previous interval, now closed with its final duration.
    pub finalized: Option<UptimeRecord>,
    /// The new open-ended interval.
    pub opened: UptimeRecord,
}

/// Apply one probe result to a projection. Returns `None` when the status is
/// unchanged; otherwise closes the previous interval, opens a new one and
/// refreshes the cached status fields.
pub fn observe(
    projection: &mut ServiceProjection,
    service_name: &str,
    status: ServiceStatus,
    metadata: StatusMetadata,
    now: DateTime<Utc>,
) -> Option<Transition> {
    if projection.current_status() == Some(status) {
        return None;
    }
    let finalized = projection.finalize_open(now);
    let opened = UptimeRecord::open(service_name, status, metadata, now);
    debug!(
        service = service_name,
        from = ?projection.current_status(),
        to = %status,
        "status transition"
    );
    projection.push_latest(opened.clone());
    Some(Transition { finalized, opened })
}
