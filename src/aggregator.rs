//! Time-windowed uptime statistics over a projection.
//!
//! Pure functions of `(projection, now)`. The open-ended last record is
//! measured against the caller's `now`, so repeated queries yield a live,
//! growing total for the current interval. Queries return `None` rather
//! than erroring when no data falls in the window.

use crate::projection::ServiceProjection;
use crate::{ServiceStatus, UptimeRecord};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// Window value meaning "all recorded history".
pub const ALL_TIME_HOURS: i64 = -1;

/// Windows beyond one year are treated as all-time so the earliest record
/// survives regardless of retention age.
const MAX_WINDOW_HOURS: i64 = 8760;

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UptimeTimeline {
    pub service_name: String,
    /// Milliseconds spent up within the window.
    pub total_uptime: i64,
    /// Milliseconds spent down or degraded within the window.
    pub total_downtime: i64,
    pub uptime_percentage: f64,
    pub current_status: Option<ServiceStatus>,
    pub last_status_change: Option<DateTime<Utc>>,
    pub records: Vec<UptimeRecord>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct UptimeSummary {
    pub service_name: String,
    pub uptime_percentage: f64,
    pub total_uptime: String,
    pub total_downtime: String,
    pub current_status: Option<ServiceStatus>,
    pub is_currently_up: bool,
    pub last_status_change: Option<DateTime<Utc>>,
    pub window_hours: i64,
}

/// Build the uptime timeline for one service over a trailing window.
/// `None` when the service has no records in the window.
#[must_use]
pub fn timeline(
    projection: &ServiceProjection,
    service_name: &str,
    window_hours: i64,
    now: DateTime<Utc>,
) -> Option<UptimeTimeline> {
    if projection.is_empty() {
        return None;
    }
    let records: Vec<UptimeRecord> = if window_hours == ALL_TIME_HOURS
        || window_hours > MAX_WINDOW_HOURS
    {
        projection.records().cloned().collect()
    } else {
        let cutoff = now - Duration::hours(window_hours);
        projection
            .records()
            .filter(|r| r.timestamp >= cutoff)
            .cloned()
            .collect()
    };
    let first = records.first()?;
    let last = records.last()?;
    let start_time = first.timestamp;
    let end_time = last.timestamp;

    let mut total_uptime: i64 = 0;
    let mut total_downtime: i64 = 0;
    for (i, record) in records.iter().enumerate() {
        let inferred = match record.duration {
            Some(d) => d,
            None => match records.get(i + 1) {
                Some(next) => (next.timestamp - record.timestamp).num_milliseconds(),
                None => (now - record.timestamp).num_milliseconds(),
            },
        };
        // Clock skew between writers can make an inferred span negative;
        // it contributes nothing rather than corrupting the totals.
        let inferred = inferred.max(0);
        if record.status.is_up() {
            total_uptime += inferred;
        } else {
            total_downtime += inferred;
        }
    }
    let total = total_uptime + total_downtime;
    let uptime_percentage = if total == 0 {
        0.0
    } else {
        total_uptime as f64 / total as f64 * 100.0
    };
    Some(UptimeTimeline {
        service_name: service_name.to_string(),
        total_uptime,
        total_downtime,
        uptime_percentage,
        current_status: projection.current_status(),
        last_status_change: projection.last_status_change(),
        records,
        start_time,
        end_time,
    })
}

/// Human-readable wrapper over [`timeline`].
#[must_use]
pub fn summary(
    projection: &ServiceProjection,
    service_name: &str,
    window_hours: i64,
    now: DateTime<Utc>,
) -> Option<UptimeSummary> {
    let timeline = timeline(projection, service_name, window_hours, now)?;
    Some(UptimeSummary {
        service_name: timeline.service_name,
        uptime_percentage: timeline.uptime_percentage,
        total_uptime: format_duration_ms(timeline.total_uptime),
        total_downtime: format_duration_ms(timeline.total_downtime),
        current_status: timeline.current_status,
        is_currently_up: timeline.current_status == Some(ServiceStatus::Up),
        last_status_change: timeline.last_status_change,
        window_hours,
    })
}

/// Summaries for every tracked service, omitting those with no data in the
/// window.
#[must_use]
pub fn all_summaries(
    projections: &BTreeMap<String, ServiceProjection>,
    window_hours: i64,
    now: DateTime<Utc>,
) -> Vec<UptimeSummary> {
    projections
        .iter()
        .filter_map(|(name, projection)| summary(projection, name, window_hours, now))
        .collect()
}

/// `"{d}d {h}h {m}m"` / `"{h}h {m}m"` / `"{m}m {s}s"` / `"{s}s"`, largest
/// nonzero unit first.
#[must_use]
pub fn format_duration_ms(ms: i64) -> String {
    let ms = ms.max(0);
    let seconds = ms / 1000 % 60;
    let minutes = ms / 60_000 % 60;
    let hours = ms / 3_600_000 % 24;
    let days = ms / 86_400_000;
    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}
