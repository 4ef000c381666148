mod api;

use api::ApiError;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get},
    Json, Router,
};
use clap::Parser;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;
use upwatch::aggregator::{UptimeSummary, UptimeTimeline};
use upwatch::event_log::MemoryEventLog;
use upwatch::probe::HttpProbe;
use upwatch::tracker::{MemoryStats, TrackerConfig, UptimeTracker};
use upwatch::ServiceStatus;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let targets: BTreeMap<String, String> = cli.service.iter().cloned().collect();
    let services: Vec<String> = targets.keys().cloned().collect();

    let probe = HttpProbe::new(targets, Duration::from_secs(cli.probe_timeout))
        .expect("Couldn't build HTTP probe client");
    // Stand-in for the external event store; swap for a real `EventLog`
    // client to share history across instances.
    let log = Arc::new(MemoryEventLog::new());

    let config = TrackerConfig {
        probe_interval: Duration::from_secs(cli.probe_interval),
        tail_interval: Duration::from_secs(cli.tail_interval),
        ..TrackerConfig::default()
    };
    let tracker = Arc::new(UptimeTracker::new(services, Arc::new(probe), log, config));
    tracker.init().await;
    tracker.start();

    let app = Router::new()
        .route("/services", get(get_statuses))
        .route("/services/:name/timeline", get(get_timeline))
        .route("/services/:name/summary", get(get_summary))
        .route("/services/:name/records", delete(reset_service))
        .route("/summaries", get(get_summaries))
        .route("/memory", get(get_memory))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(&tracker));

    info!("Binding to {}", cli.address);
    let listener = tokio::net::TcpListener::bind(&cli.address)
        .await
        .expect("Couldn't create TCP listener");
    info!("Starting API server");
    let shutdown_tracker = Arc::clone(&tracker);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("Termination signal received");
            shutdown_tracker.shutdown().await;
        })
        .await
        .expect("Couldn't start API server");
}

#[derive(Deserialize)]
struct WindowQuery {
    hours: Option<i64>,
}

impl WindowQuery {
    fn hours(&self) -> i64 {
        self.hours.unwrap_or(24)
    }
}

async fn get_statuses(
    State(tracker): State<Arc<UptimeTracker>>,
) -> Json<BTreeMap<String, ServiceStatus>> {
    Json(tracker.current_statuses().await)
}

async fn get_timeline(
    State(tracker): State<Arc<UptimeTracker>>,
    Path(name): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<UptimeTimeline>, ApiError> {
    tracker
        .timeline(&name, window.hours())
        .await
        .map(Json)
        .ok_or(ApiError::NoData)
}

async fn get_summary(
    State(tracker): State<Arc<UptimeTracker>>,
    Path(name): Path<String>,
    Query(window): Query<WindowQuery>,
) -> Result<Json<UptimeSummary>, ApiError> {
    tracker
        .summary(&name, window.hours())
        .await
        .map(Json)
        .ok_or(ApiError::NoData)
}

async fn reset_service(
    State(tracker): State<Arc<UptimeTracker>>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    if tracker.reset(&name).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NoData)
    }
}

async fn get_summaries(
    State(tracker): State<Arc<UptimeTracker>>,
    Query(window): Query<WindowQuery>,
) -> Json<Vec<UptimeSummary>> {
    Json(tracker.all_summaries(window.hours()).await)
}

async fn get_memory(State(tracker): State<Arc<UptimeTracker>>) -> Json<MemoryStats> {
    Json(tracker.memory_stats().await)
}

fn parse_target(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, url)| (name.to_string(), url.to_string()))
        .ok_or_else(|| format!("expected name=url, got {raw}"))
}

#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Listening address for the query API
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    address: String,

    /// Tracked service as name=url, repeatable
    #[arg(short, long, value_parser = parse_target)]
    service: Vec<(String, String)>,

    /// Seconds between health probes
    #[arg(long, default_value_t = 30)]
    probe_interval: u64,

    /// Seconds between durable-log tail reads
    #[arg(long, default_value_t = 15)]
    tail_interval: u64,

    /// Per-probe timeout in seconds
    #[arg(long, default_value_t = 10)]
    probe_timeout: u64,
}
