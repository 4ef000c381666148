//! The uptime tracking service instance.
//!
//! One `UptimeTracker` is constructed at process start and passed by
//! reference to whatever layer queries it. All projections are owned by a
//! single actor task; the probe, tail and sweep timers mutate them only
//! through its message channel, so ordering and dedupe invariants hold
//! without per-projection locks. Cross-service probing runs concurrently;
//! durable appends are fire-and-forget and never block the transition path.

use crate::aggregator::{self, UptimeSummary, UptimeTimeline};
use crate::detector::{self, Transition};
use crate::event_log::{
    EventData, EventLog, Position, ReadDirection, ReadOptions, RecordedEvent,
};
use crate::probe::{Probe, ProbeOutcome};
use crate::projection::ServiceProjection;
use crate::retention;
use crate::tailer::{self, MergeOutcome, MAX_TAIL_ERRORS, TAIL_BATCH_SIZE};
use crate::{ServiceStatus, StatusMetadata, UptimeRecord, STATUS_CHANGE_EVENT};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout};
use tracing::{debug, error, info, warn};

/// Durable-log stream carrying one service's status transitions.
#[must_use]
pub fn stream_name(service_name: &str) -> String {
    format!("service-status-{service_name}")
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub probe_interval: Duration,
    pub tail_interval: Duration,
    pub sweep_interval: Duration,
    /// Upper bound on a single probe, on top of whatever timeout the probe
    /// implementation carries itself.
    pub probe_timeout: Duration,
    /// How long shutdown waits for the final flush appends.
    pub shutdown_grace: Duration,
    pub max_records: usize,
    pub max_age: chrono::Duration,
    pub max_tail_errors: u32,
    pub tail_batch: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(30),
            tail_interval: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(3600),
            probe_timeout: Duration::from_secs(10),
            shutdown_grace: Duration::from_secs(1),
            max_records: crate::projection::DEFAULT_MAX_RECORDS,
            max_age: chrono::Duration::days(30),
            max_tail_errors: MAX_TAIL_ERRORS,
            tail_batch: TAIL_BATCH_SIZE,
        }
    }
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    pub total_records: usize,
    pub records_per_service: BTreeMap<String, usize>,
    /// Rough in-memory footprint of the record sequences, in bytes.
    pub memory_estimate: usize,
}

const APPROX_RECORD_BYTES: usize = 256;

enum ProjectionCommand {
    Observe {
        service: String,
        status: ServiceStatus,
        metadata: StatusMetadata,
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<Option<Transition>>,
    },
    TailState {
        service: String,
        respond_to: oneshot::Sender<(Option<Position>, u32)>,
    },
    MergeBatch {
        service: String,
        events: Vec<RecordedEvent>,
        respond_to: oneshot::Sender<MergeOutcome>,
    },
    TailFailed {
        service: String,
        respond_to: oneshot::Sender<u32>,
    },
    Seed {
        service: String,
        projection: ServiceProjection,
        respond_to: oneshot::Sender<()>,
    },
    Sweep {
        now: DateTime<Utc>,
        respond_to: oneshot::Sender<usize>,
    },
    Snapshot {
        service: String,
        respond_to: oneshot::Sender<Option<ServiceProjection>>,
    },
    SnapshotAll {
        respond_to: oneshot::Sender<BTreeMap<String, ServiceProjection>>,
    },
    CurrentStatuses {
        respond_to: oneshot::Sender<BTreeMap<String, ServiceStatus>>,
    },
    MemoryStats {
        respond_to: oneshot::Sender<MemoryStats>,
    },
    Reset {
        service: String,
        respond_to: oneshot::Sender<bool>,
    },
}

struct ProjectionActor {
    receiver: mpsc::UnboundedReceiver<ProjectionCommand>,
    projections: BTreeMap<String, ServiceProjection>,
    max_records: usize,
    max_age: chrono::Duration,
}

impl ProjectionActor {
    fn projection_mut(&mut self, service: &str) -> &mut ServiceProjection {
        let max_records = self.max_records;
        self.projections
            .entry(service.to_string())
            .or_insert_with(|| ServiceProjection::new(max_records))
    }

    fn handle_command(&mut self, command: ProjectionCommand) {
        // Errors when sending a response can happen e.g. if the requester
        // was cancelled while waiting. We can safely ignore these.
        match command {
            ProjectionCommand::Observe {
                service,
                status,
                metadata,
                now,
                respond_to,
            } => {
                let projection = self.projection_mut(&service);
                let transition = detector::observe(projection, &service, status, metadata, now);
                let _ = respond_to.send(transition);
            }
            ProjectionCommand::TailState {
                service,
                respond_to,
            } => {
                let state = self.projections.get(&service).map_or((None, 0), |p| {
                    (p.tail_cursor(), p.consecutive_tail_errors())
                });
                let _ = respond_to.send(state);
            }
            ProjectionCommand::MergeBatch {
                service,
                events,
                respond_to,
            } => {
                let projection = self.projection_mut(&service);
                let outcome = tailer::merge_batch(projection, &events);
                let _ = respond_to.send(outcome);
            }
            ProjectionCommand::TailFailed {
                service,
                respond_to,
            } => {
                let count = self.projection_mut(&service).record_tail_error();
                let _ = respond_to.send(count);
            }
            ProjectionCommand::Seed {
                service,
                projection,
                respond_to,
            } => {
                self.projections.insert(service, projection);
                let _ = respond_to.send(());
            }
            ProjectionCommand::Sweep { now, respond_to } => {
                let removed = retention::sweep(&mut self.projections, self.max_age, now);
                let _ = respond_to.send(removed);
            }
            ProjectionCommand::Snapshot {
                service,
                respond_to,
            } => {
                let _ = respond_to.send(self.projections.get(&service).cloned());
            }
            ProjectionCommand::SnapshotAll { respond_to } => {
                let _ = respond_to.send(self.projections.clone());
            }
            ProjectionCommand::CurrentStatuses { respond_to } => {
                let statuses = self
                    .projections
                    .iter()
                    .filter_map(|(name, p)| p.current_status().map(|s| (name.clone(), s)))
                    .collect();
                let _ = respond_to.send(statuses);
            }
            ProjectionCommand::MemoryStats { respond_to } => {
                let records_per_service: BTreeMap<String, usize> = self
                    .projections
                    .iter()
                    .map(|(name, p)| (name.clone(), p.len()))
                    .collect();
                let total_records = records_per_service.values().sum();
                let _ = respond_to.send(MemoryStats {
                    total_records,
                    records_per_service,
                    memory_estimate: total_records * APPROX_RECORD_BYTES,
                });
            }
            ProjectionCommand::Reset {
                service,
                respond_to,
            } => {
                let known = match self.projections.get_mut(&service) {
                    Some(projection) => {
                        projection.clear();
                        true
                    }
                    None => false,
                };
                let _ = respond_to.send(known);
            }
        }
    }

    async fn run(&mut self) {
        while let Some(command) = self.receiver.recv().await {
            self.handle_command(command);
        }
    }
}

#[derive(Clone)]
struct ProjectionHandle {
    sender: mpsc::UnboundedSender<ProjectionCommand>,
}

impl ProjectionHandle {
    fn new(max_records: usize, max_age: chrono::Duration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut actor = ProjectionActor {
            receiver,
            projections: BTreeMap::new(),
            max_records,
            max_age,
        };
        tokio::spawn(async move { actor.run().await });
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ProjectionCommand,
    ) -> T {
        let (send, recv) = oneshot::channel();
        // Ignore send errors. If this send fails, so does the recv.await
        // below. There's no reason to check for the same failure twice.
        let _ = self.sender.send(build(send));
        recv.await.expect("Projection actor task has been killed")
    }
}

/// The service instance. Construct once, `init` to replay the durable log,
/// `start` the timers, query, `shutdown` on termination.
pub struct UptimeTracker {
    services: Vec<String>,
    probe: Arc<dyn Probe>,
    log: Arc<dyn EventLog>,
    config: TrackerConfig,
    handle: ProjectionHandle,
    shutdown_signal: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl UptimeTracker {
    #[must_use]
    pub fn new(
        services: Vec<String>,
        probe: Arc<dyn Probe>,
        log: Arc<dyn EventLog>,
        config: TrackerConfig,
    ) -> Self {
        let handle = ProjectionHandle::new(config.max_records, config.max_age);
        let (shutdown_signal, _) = watch::channel(false);
        Self {
            services,
            probe,
            log,
            config,
            handle,
            shutdown_signal,
            tasks: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn services(&self) -> &[String] {
        &self.services
    }

    /// Rebuild every projection from the durable log, newest
    /// `max_records` per service, and seed each tail cursor at the newest
    /// replayed position. Read failures leave an empty projection; the
    /// tailer will fill it in once the store recovers.
    pub async fn init(&self) {
        for service in &self.services {
            let stream = stream_name(service);
            let options = ReadOptions {
                from: None,
                direction: ReadDirection::Backward,
                max_count: self.config.max_records,
            };
            let projection = match self.log.read(&stream, options).await {
                Ok(events) => {
                    let cursor = events.iter().map(|e| e.position).max();
                    let records: Vec<UptimeRecord> = events
                        .iter()
                        .filter_map(tailer::parse_status_event)
                        .collect();
                    info!(
                        service = %service,
                        records = records.len(),
                        "replayed status history"
                    );
                    ServiceProjection::from_replay(records, cursor, self.config.max_records)
                }
                Err(log_error) => {
                    warn!(
                        service = %service,
                        error = %log_error,
                        "replay failed, starting with empty projection"
                    );
                    ServiceProjection::new(self.config.max_records)
                }
            };
            self.handle
                .request(|respond_to| ProjectionCommand::Seed {
                    service: service.clone(),
                    projection,
                    respond_to,
                })
                .await;
        }
    }

    /// Start the probe, tail and sweep timers. Each is individually stopped
    /// by [`shutdown`](Self::shutdown).
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("tracker task list poisoned");
        tasks.push(self.spawn_probe_loop());
        tasks.push(self.spawn_tail_loop());
        tasks.push(self.spawn_sweep_loop());
        info!(services = self.services.len(), "uptime tracking started");
    }

    fn spawn_probe_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let mut shutdown = self.shutdown_signal.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(tracker.config.probe_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = tracker.probe_cycle(Utc::now()).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_tail_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let mut shutdown = self.shutdown_signal.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(tracker.config.tail_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => tracker.tail_cycle().await,
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    fn spawn_sweep_loop(self: &Arc<Self>) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        let mut shutdown = self.shutdown_signal.subscribe();
        tokio::spawn(async move {
            let mut ticker = interval(tracker.config.sweep_interval);
            // The first interval tick fires immediately; sweeping right
            // after replay would be pointless.
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracker.sweep_cycle(Utc::now()).await;
                    }
                    _ = shutdown.changed() => break,
                }
            }
        })
    }

    /// Probe every service concurrently and feed the results through the
    /// detector. Returns the join handles of any fire-and-forget appends so
    /// the shutdown flush can bound-wait on them.
    async fn probe_cycle(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        let probes = self.services.iter().map(|service| {
            let probe = Arc::clone(&self.probe);
            async move {
                let outcome = match timeout(self.config.probe_timeout, probe.probe(service)).await
                {
                    Ok(outcome) => outcome,
                    Err(_) => ProbeOutcome::down("probe timed out"),
                };
                (service.clone(), outcome)
            }
        });
        let mut appends = Vec::new();
        for (service, outcome) in join_all(probes).await {
            appends.extend(
                self.apply_observation(&service, outcome.status, outcome.metadata, now)
                    .await,
            );
        }
        appends
    }

    async fn apply_observation(
        &self,
        service: &str,
        status: ServiceStatus,
        metadata: StatusMetadata,
        now: DateTime<Utc>,
    ) -> Vec<JoinHandle<()>> {
        let transition = self
            .handle
            .request(|respond_to| ProjectionCommand::Observe {
                service: service.to_string(),
                status,
                metadata,
                now,
                respond_to,
            })
            .await;
        let Some(transition) = transition else {
            return Vec::new();
        };
        info!(service = %service, status = %status, "service status changed");
        let mut appends = Vec::new();
        if let Some(finalized) = transition.finalized {
            appends.extend(self.spawn_append(service, finalized));
        }
        appends.extend(self.spawn_append(service, transition.opened));
        appends
    }

    /// Persist a record without blocking the transition path. A failed
    /// append is logged and the record stays local-only; other instances
    /// will not see it unless a later write succeeds.
    fn spawn_append(&self, service: &str, record: UptimeRecord) -> Option<JoinHandle<()>> {
        let data = match serde_json::to_value(&record) {
            Ok(data) => data,
            Err(serialize_error) => {
                warn!(
                    service = %service,
                    error = %serialize_error,
                    "could not serialize status record"
                );
                return None;
            }
        };
        let log = Arc::clone(&self.log);
        let stream = stream_name(service);
        let service = service.to_string();
        Some(tokio::spawn(async move {
            let event = EventData {
                event_type: STATUS_CHANGE_EVENT.to_string(),
                data,
                metadata: None,
            };
            if let Err(append_error) = log.append(&stream, event).await {
                warn!(
                    service = %service,
                    error = %append_error,
                    "durable append failed, record remains local-only"
                );
            }
        }))
    }

    /// One tail pass over every service's stream.
    async fn tail_cycle(&self) {
        for service in &self.services {
            let (cursor, errors) = self
                .handle
                .request(|respond_to| ProjectionCommand::TailState {
                    service: service.clone(),
                    respond_to,
                })
                .await;
            if errors >= self.config.max_tail_errors {
                debug!(service = %service, "tailing suspended after repeated failures");
                continue;
            }
            let options = ReadOptions {
                from: cursor.map(|c| c + 1),
                direction: ReadDirection::Forward,
                max_count: self.config.tail_batch,
            };
            match self.log.read(&stream_name(service), options).await {
                Ok(events) => {
                    let outcome = self
                        .handle
                        .request(|respond_to| ProjectionCommand::MergeBatch {
                            service: service.clone(),
                            events,
                            respond_to,
                        })
                        .await;
                    if outcome.applied > 0 {
                        debug!(
                            service = %service,
                            applied = outcome.applied,
                            duplicates = outcome.duplicates,
                            "merged tailed events"
                        );
                    }
                }
                Err(read_error) => {
                    let count = self
                        .handle
                        .request(|respond_to| ProjectionCommand::TailFailed {
                            service: service.clone(),
                            respond_to,
                        })
                        .await;
                    if count >= self.config.max_tail_errors {
                        error!(
                            service = %service,
                            consecutive = count,
                            error = %read_error,
                            "suspending stream tailing"
                        );
                    } else {
                        warn!(
                            service = %service,
                            consecutive = count,
                            error = %read_error,
                            "stream read failed"
                        );
                    }
                }
            }
        }
    }

    async fn sweep_cycle(&self, now: DateTime<Utc>) -> usize {
        self.handle
            .request(|respond_to| ProjectionCommand::Sweep { now, respond_to })
            .await
    }

    /// Stop the timers, then force every service that is not already down
    /// through a final `down` transition so outage time while this process
    /// is gone stays attributable. Waits at most `shutdown_grace` for the
    /// flush appends.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_signal.send(true);
        let tasks: Vec<JoinHandle<()>> = {
            let mut guard = self.tasks.lock().expect("tracker task list poisoned");
            guard.drain(..).collect()
        };
        for task in tasks {
            let _ = task.await;
        }

        let now = Utc::now();
        let statuses = self.current_statuses().await;
        let mut appends = Vec::new();
        for (service, status) in statuses {
            if status == ServiceStatus::Down {
                continue;
            }
            let metadata = StatusMetadata {
                reason: Some("shutdown".to_string()),
                ..StatusMetadata::default()
            };
            appends.extend(
                self.apply_observation(&service, ServiceStatus::Down, metadata, now)
                    .await,
            );
        }
        if timeout(self.config.shutdown_grace, join_all(appends))
            .await
            .is_err()
        {
            warn!("shutdown grace expired with appends still in flight");
        }
        info!("uptime tracking stopped");
    }

    pub async fn timeline(&self, service: &str, window_hours: i64) -> Option<UptimeTimeline> {
        let projection = self
            .handle
            .request(|respond_to| ProjectionCommand::Snapshot {
                service: service.to_string(),
                respond_to,
            })
            .await?;
        aggregator::timeline(&projection, service, window_hours, Utc::now())
    }

    pub async fn summary(&self, service: &str, window_hours: i64) -> Option<UptimeSummary> {
        let projection = self
            .handle
            .request(|respond_to| ProjectionCommand::Snapshot {
                service: service.to_string(),
                respond_to,
            })
            .await?;
        aggregator::summary(&projection, service, window_hours, Utc::now())
    }

    pub async fn all_summaries(&self, window_hours: i64) -> Vec<UptimeSummary> {
        let projections = self
            .handle
            .request(|respond_to| ProjectionCommand::SnapshotAll { respond_to })
            .await;
        aggregator::all_summaries(&projections, window_hours, Utc::now())
    }

    pub async fn current_statuses(&self) -> BTreeMap<String, ServiceStatus> {
        self.handle
            .request(|respond_to| ProjectionCommand::CurrentStatuses { respond_to })
            .await
    }

    pub async fn memory_stats(&self) -> MemoryStats {
        self.handle
            .request(|respond_to| ProjectionCommand::MemoryStats { respond_to })
            .await
    }

    /// Drop all in-memory state for one service. The durable log is left
    /// untouched. Returns `false` for an untracked service.
    pub async fn reset(&self, service: &str) -> bool {
        self.handle
            .request(|respond_to| ProjectionCommand::Reset {
                service: service.to_string(),
                respond_to,
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::{EventLogError, MemoryEventLog};
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;

    struct ScriptedProbe {
        outcomes: Mutex<BTreeMap<String, VecDeque<ProbeOutcome>>>,
    }

    impl ScriptedProbe {
        fn new() -> Self {
            Self {
                outcomes: Mutex::new(BTreeMap::new()),
            }
        }

        fn push(&self, service: &str, status: ServiceStatus) {
            self.outcomes
                .lock()
                .unwrap()
                .entry(service.to_string())
                .or_default()
                .push_back(ProbeOutcome {
                    status,
                    metadata: StatusMetadata::default(),
                });
        }
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, service_name: &str) -> ProbeOutcome {
            self.outcomes
                .lock()
                .unwrap()
                .get_mut(service_name)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| ProbeOutcome {
                    status: ServiceStatus::Up,
                    metadata: StatusMetadata::default(),
                })
        }
    }

    struct FailingLog;

    #[async_trait]
    impl EventLog for FailingLog {
        async fn append(
            &self,
            stream: &str,
            _event: EventData,
        ) -> Result<crate::event_log::AppendResult, EventLogError> {
            Err(EventLogError::AppendFailed {
                stream: stream.to_string(),
                reason: "store offline".to_string(),
            })
        }

        async fn read(
            &self,
            stream: &str,
            _options: ReadOptions,
        ) -> Result<Vec<RecordedEvent>, EventLogError> {
            Err(EventLogError::ReadFailed {
                stream: stream.to_string(),
                reason: "store offline".to_string(),
            })
        }
    }

    fn tracker_with(
        services: &[&str],
        probe: Arc<dyn Probe>,
        log: Arc<dyn EventLog>,
    ) -> UptimeTracker {
        UptimeTracker::new(
            services.iter().map(|s| s.to_string()).collect(),
            probe,
            log,
            TrackerConfig::default(),
        )
    }

    #[tokio::test]
    async fn transition_is_persisted_as_events() {
        let probe = Arc::new(ScriptedProbe::new());
        let log = Arc::new(MemoryEventLog::new());
        let tracker = tracker_with(&["http"], probe.clone(), log.clone());

        probe.push("http", ServiceStatus::Up);
        join_all(tracker.probe_cycle(Utc::now()).await).await;
        // First observation: one open record appended.
        assert_eq!(log.stream_len("service-status-http"), 1);

        probe.push("http", ServiceStatus::Down);
        join_all(tracker.probe_cycle(Utc::now()).await).await;
        // Transition: finalized previous plus new open record.
        assert_eq!(log.stream_len("service-status-http"), 3);

        let statuses = tracker.current_statuses().await;
        assert_eq!(statuses["http"], ServiceStatus::Down);
    }

    #[tokio::test]
    async fn steady_state_appends_nothing() {
        let probe = Arc::new(ScriptedProbe::new());
        let log = Arc::new(MemoryEventLog::new());
        let tracker = tracker_with(&["http"], probe.clone(), log.clone());

        for _ in 0..3 {
            // Scripted default is Up every cycle.
            join_all(tracker.probe_cycle(Utc::now()).await).await;
        }
        assert_eq!(log.stream_len("service-status-http"), 1);
    }

    #[tokio::test]
    async fn init_replays_history_from_the_log() {
        let log = Arc::new(MemoryEventLog::new());
        for (id, status, ts) in [
            ("a", "up", "2026-01-01T00:00:00Z"),
            ("b", "down", "2026-01-01T01:00:00Z"),
        ] {
            log.append(
                "service-status-http",
                EventData {
                    event_type: STATUS_CHANGE_EVENT.to_string(),
                    data: json!({
                        "id": id,
                        "serviceName": "http",
                        "status": status,
                        "timestamp": ts,
                    }),
                    metadata: None,
                },
            )
            .await
            .unwrap();
        }
        let probe = Arc::new(ScriptedProbe::new());
        let tracker = tracker_with(&["http"], probe, log);
        tracker.init().await;

        let timeline = tracker.timeline("http", -1).await.unwrap();
        assert_eq!(timeline.records.len(), 2);
        assert_eq!(timeline.current_status, Some(ServiceStatus::Down));
        // The tailer resumes after the replayed events, not from scratch.
        let memory = tracker.memory_stats().await;
        assert_eq!(memory.total_records, 2);
    }

    #[tokio::test]
    async fn tailer_merges_foreign_events_exactly_once() {
        let log = Arc::new(MemoryEventLog::new());
        let probe = Arc::new(ScriptedProbe::new());
        let tracker = tracker_with(&["http"], probe, log.clone());
        tracker.init().await;

        // Another instance appends a transition.
        log.append(
            "service-status-http",
            EventData {
                event_type: STATUS_CHANGE_EVENT.to_string(),
                data: json!({
                    "id": "foreign-1",
                    "serviceName": "http",
                    "status": "down",
                    "timestamp": "2026-01-01T00:00:00Z",
                }),
                metadata: None,
            },
        )
        .await
        .unwrap();

        tracker.tail_cycle().await;
        tracker.tail_cycle().await;
        let memory = tracker.memory_stats().await;
        assert_eq!(memory.total_records, 1);
        let statuses = tracker.current_statuses().await;
        assert_eq!(statuses["http"], ServiceStatus::Down);
    }

    #[tokio::test]
    async fn tailer_does_not_duplicate_locally_authored_records() {
        let probe = Arc::new(ScriptedProbe::new());
        let log = Arc::new(MemoryEventLog::new());
        let tracker = tracker_with(&["http"], probe.clone(), log.clone());
        tracker.init().await;

        probe.push("http", ServiceStatus::Up);
        join_all(tracker.probe_cycle(Utc::now()).await).await;
        tracker.tail_cycle().await;

        // The tailer read back our own append and must have skipped it.
        let memory = tracker.memory_stats().await;
        assert_eq!(memory.records_per_service["http"], 1);
    }

    #[tokio::test]
    async fn repeated_read_failures_suspend_tailing_at_the_threshold() {
        let probe = Arc::new(ScriptedProbe::new());
        let tracker = tracker_with(&["http"], probe, Arc::new(FailingLog));

        for _ in 0..8 {
            tracker.tail_cycle().await;
        }
        let projection = tracker
            .handle
            .request(|respond_to| ProjectionCommand::Snapshot {
                service: "http".to_string(),
                respond_to,
            })
            .await
            .unwrap();
        // Cycles past the threshold skip the stream, so the counter stops
        // exactly at the limit.
        assert_eq!(
            projection.consecutive_tail_errors(),
            TrackerConfig::default().max_tail_errors
        );
    }

    #[tokio::test]
    async fn failed_appends_keep_the_projection_intact() {
        let probe = Arc::new(ScriptedProbe::new());
        let tracker = tracker_with(&["http"], probe.clone(), Arc::new(FailingLog));

        probe.push("http", ServiceStatus::Up);
        join_all(tracker.probe_cycle(Utc::now()).await).await;
        let statuses = tracker.current_statuses().await;
        assert_eq!(statuses["http"], ServiceStatus::Up);
        let memory = tracker.memory_stats().await;
        assert_eq!(memory.total_records, 1);
    }

    #[tokio::test]
    async fn shutdown_forces_non_down_services_to_down() {
        let probe = Arc::new(ScriptedProbe::new());
        let log = Arc::new(MemoryEventLog::new());
        let tracker = tracker_with(&["http", "database"], probe.clone(), log.clone());

        probe.push("http", ServiceStatus::Up);
        probe.push("database", ServiceStatus::Down);
        join_all(tracker.probe_cycle(Utc::now()).await).await;

        tracker.shutdown().await;
        let statuses = tracker.current_statuses().await;
        assert_eq!(statuses["http"], ServiceStatus::Down);
        assert_eq!(statuses["database"], ServiceStatus::Down);

        // http got a finalized record plus the shutdown transition;
        // database was already down and is left alone.
        assert_eq!(log.stream_len("service-status-http"), 3);
        assert_eq!(log.stream_len("service-status-database"), 1);

        let timeline = tracker.timeline("http", -1).await.unwrap();
        let last = timeline.records.last().unwrap();
        assert_eq!(
            last.metadata.as_ref().unwrap().reason.as_deref(),
            Some("shutdown")
        );
    }

    #[tokio::test]
    async fn reset_clears_one_service_without_touching_others() {
        let probe = Arc::new(ScriptedProbe::new());
        let log = Arc::new(MemoryEventLog::new());
        let tracker = tracker_with(&["http", "database"], probe.clone(), log.clone());

        join_all(tracker.probe_cycle(Utc::now()).await).await;
        assert!(tracker.reset("http").await);
        assert!(!tracker.reset("ghost").await);

        let memory = tracker.memory_stats().await;
        assert_eq!(memory.records_per_service["http"], 0);
        assert_eq!(memory.records_per_service["database"], 1);
        let statuses = tracker.current_statuses().await;
        assert!(!statuses.contains_key("http"));
        assert_eq!(statuses["database"], ServiceStatus::Up);
    }

    #[tokio::test]
    async fn sweep_cycle_prunes_aged_records() {
        let probe = Arc::new(ScriptedProbe::new());
        let log = Arc::new(MemoryEventLog::new());
        let tracker = tracker_with(&["http"], probe.clone(), log.clone());

        join_all(tracker.probe_cycle(Utc::now()).await).await;
        let far_future = Utc::now() + chrono::Duration::days(90);
        let removed = tracker.sweep_cycle(far_future).await;
        assert_eq!(removed, 1);
        let memory = tracker.memory_stats().await;
        assert_eq!(memory.total_records, 0);
    }
}
