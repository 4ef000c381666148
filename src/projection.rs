//! Bounded in-memory view of one service's status history.
//!
//! A projection is derived state: rebuilt from the durable log at startup,
//! mutated by the local detector and by the stream tailer, pruned by the
//! retention sweep. It performs no I/O itself.

use crate::event_log::Position;
use crate::{ServiceStatus, UptimeRecord};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;

pub const DEFAULT_MAX_RECORDS: usize = 1000;

#[derive(Debug, Clone)]
pub struct ServiceProjection {
    records: VecDeque<UptimeRecord>,
    max_records: usize,
    current_status: Option<ServiceStatus>,
    last_status_change: Option<DateTime<Utc>>,
    start_time: Option<DateTime<Utc>>,
    tail_cursor: Option<Position>,
    consecutive_tail_errors: u32,
}

impl Default for ServiceProjection {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RECORDS)
    }
}

impl ServiceProjection {
    #[must_use]
    pub fn new(max_records: usize) -> Self {
        Self {
            records: VecDeque::new(),
            max_records: max_records.max(1),
            current_status: None,
            last_status_change: None,
            start_time: None,
            tail_cursor: None,
            consecutive_tail_errors: 0,
        }
    }

    /// Rebuild from records replayed out of the durable log, ascending by
    /// timestamp. Keeps only the newest `max_records`; the cursor is seeded
    /// at the newest position observed during replay.
    #[must_use]
    pub fn from_replay(
        mut records: Vec<UptimeRecord>,
        cursor: Option<Position>,
        max_records: usize,
    ) -> Self {
        let mut projection = Self::new(max_records);
        records.sort_by_key(|r| r.timestamp);
        projection.start_time = records.first().map(|r| r.timestamp);
        if records.len() > projection.max_records {
            records.drain(..records.len() - projection.max_records);
        }
        projection.records = records.into();
        if let Some(last) = projection.records.back() {
            projection.current_status = Some(last.status);
            projection.last_status_change = Some(last.timestamp);
        }
        projection.tail_cursor = cursor;
        projection
    }

    pub fn records(&self) -> impl Iterator<Item = &UptimeRecord> {
        self.records.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn current_status(&self) -> Option<ServiceStatus> {
        self.current_status
    }

    #[must_use]
    pub fn last_status_change(&self) -> Option<DateTime<Utc>> {
        self.last_status_change
    }

    #[must_use]
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time
    }

    #[must_use]
    pub fn tail_cursor(&self) -> Option<Position> {
        self.tail_cursor
    }

    #[must_use]
    pub fn consecutive_tail_errors(&self) -> u32 {
        self.consecutive_tail_errors
    }

    #[must_use]
    pub fn contains_id(&self, id: &str) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    /// Close the currently open record at `now` and return a copy of it for
    /// persistence. The record stays in the sequence.
    pub fn finalize_open(&mut self, now: DateTime<Utc>) -> Option<UptimeRecord> {
        let last = self.records.back_mut()?;
        if !last.is_open() {
            return None;
        }
        let elapsed = (now - last.timestamp).num_milliseconds().max(0);
        last.duration = Some(elapsed);
        Some(last.clone())
    }

    /// Append a locally authored transition record and refresh the cached
    /// status fields. Evicts the oldest record when over capacity.
    pub fn push_latest(&mut self, record: UptimeRecord) {
        self.current_status = Some(record.status);
        self.last_status_change = Some(record.timestamp);
        if self.start_time.is_none() {
            self.start_time = Some(record.timestamp);
        }
        self.records.push_back(record);
        while self.records.len() > self.max_records {
            self.records.pop_front();
        }
    }

    /// Merge a record observed on the durable log. Returns `false` when the
    /// id is already present (duplicate observation). Insertion keeps the
    /// sequence ordered by timestamp and evicts the oldest on overflow.
    pub fn merge(&mut self, record: UptimeRecord) -> bool {
        if self.contains_id(&record.id) {
            return false;
        }
        let index = self
            .records
            .iter()
            .rposition(|r| r.timestamp <= record.timestamp)
            .map_or(0, |i| i + 1);
        self.records.insert(index, record);
        while self.records.len() > self.max_records {
            self.records.pop_front();
        }
        if let Some(last) = self.records.back() {
            self.current_status = Some(last.status);
            self.last_status_change = Some(last.timestamp);
        }
        if let Some(first) = self.records.front() {
            if self.start_time.map_or(true, |t| first.timestamp < t) {
                self.start_time = Some(first.timestamp);
            }
        }
        true
    }

    /// Drop records that started before `horizon`. Returns how many were
    /// removed. Purely age-based; can remove the record anchoring the open
    /// interval.
    pub fn prune_older_than(&mut self, horizon: DateTime<Utc>) -> usize {
        let before = self.records.len();
        self.records.retain(|r| r.timestamp >= horizon);
        before - self.records.len()
    }

    pub fn advance_cursor(&mut self, position: Position) {
        if self.tail_cursor.map_or(true, |c| position > c) {
            self.tail_cursor = Some(position);
        }
    }

    pub fn reset_tail_errors(&mut self) {
        self.consecutive_tail_errors = 0;
    }

    pub fn record_tail_error(&mut self) -> u32 {
        self.consecutive_tail_errors += 1;
        self.consecutive_tail_errors
    }

    /// Drop all records and cached state, keeping capacity configuration.
    pub fn clear(&mut self) {
        self.records.clear();
        self.current_status = None;
        self.last_status_change = None;
        self.start_time = None;
        self.tail_cursor = None;
        self.consecutive_tail_errors = 0;
    }
}
