//! Age-based pruning of projections.

use crate::projection::ServiceProjection;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;
use tracing::info;

/// Drop records older than `max_age` from every projection. Returns the
/// total number of records removed.
///
/// The prune is purely age-based: it can remove the record that anchors the
/// currently open interval, in which case later window queries lose that
/// anchor. Kept as-is intentionally.
pub fn sweep(
    projections: &mut BTreeMap<String, ServiceProjection>,
    max_age: Duration,
    now: DateTime<Utc>,
) -> usize {
    let horizon = now - max_age;
    let mut total = 0;
    for (name, projection) in projections.iter_mut() {
        let removed = projection.prune_older_than(horizon);
        if removed > 0 {
            info!(service = %name, removed, "retention sweep pruned records");
        }
        total += removed;
    }
    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::observe;
    use crate::{ServiceStatus, StatusMetadata};
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, hour, 0, 0).unwrap()
    }

    fn projection_with(hours: &[(ServiceStatus, u32)]) -> ServiceProjection {
        let mut p = ServiceProjection::new(100);
        for &(status, hour) in hours {
            observe(&mut p, "svc", status, StatusMetadata::default(), at(hour));
        }
        p
    }

    #[test]
    fn sweep_prunes_only_records_past_the_horizon() {
        let mut projections = BTreeMap::new();
        projections.insert(
            "http".to_string(),
            projection_with(&[
                (ServiceStatus::Up, 0),
                (ServiceStatus::Down, 5),
                (ServiceStatus::Up, 10),
            ]),
        );
        // Horizon is hour 4: only the hour-0 record falls past it.
        let removed = sweep(&mut projections, Duration::hours(8), at(12));
        assert_eq!(removed, 1);
        let p = &projections["http"];
        assert_eq!(p.len(), 2);
        assert!(p.records().all(|r| r.timestamp >= at(4)));

        // A record exactly at the horizon survives; only strictly older
        // records are dropped.
        let removed = sweep(&mut projections, Duration::hours(7), at(12));
        assert_eq!(removed, 0);
        let removed = sweep(&mut projections, Duration::hours(2), at(12));
        assert_eq!(removed, 1);
        assert_eq!(projections["http"].len(), 1);
    }

    #[test]
    fn sweep_leaves_other_services_untouched() {
        let mut projections = BTreeMap::new();
        projections.insert(
            "http".to_string(),
            projection_with(&[(ServiceStatus::Up, 0)]),
        );
        projections.insert(
            "database".to_string(),
            projection_with(&[(ServiceStatus::Up, 11)]),
        );
        let removed = sweep(&mut projections, Duration::hours(2), at(12));
        assert_eq!(removed, 1);
        assert!(projections["http"].is_empty());
        assert_eq!(projections["database"].len(), 1);
        assert_eq!(
            projections["database"].current_status(),
            Some(ServiceStatus::Up)
        );
    }

    #[test]
    fn sweep_can_remove_the_open_interval_anchor() {
        let mut projections = BTreeMap::new();
        projections.insert(
            "http".to_string(),
            projection_with(&[(ServiceStatus::Up, 0)]),
        );
        sweep(&mut projections, Duration::hours(1), at(12));
        // The open record is gone; the cached status survives.
        assert!(projections["http"].is_empty());
        assert_eq!(
            projections["http"].current_status(),
            Some(ServiceStatus::Up)
        );
    }
}
