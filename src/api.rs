use std::sync::Arc;
use std::time::Instant;

use axum::{extract::State, routing::get, Json, Router};
use parking_lot::RwLock;
use serde::Serialize;

use crate::config::{AppConfig, FilterSettings, SourceKind};
use crate::ingest::CycleOutcome;
use crate::metrics::Metrics;
use crate::resilience::{ErrorHandler, ErrorStats};
use crate::telemetry::{OperationStats, SystemInfo, Telemetry};

/// Counters of the most recent pipeline cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    pub finished_at: chrono::DateTime<chrono::Utc>,
    pub fetched: usize,
    pub after_dedup: usize,
    pub kept: usize,
}

impl From<&CycleOutcome> for CycleSummary {
    fn from(o: &CycleOutcome) -> Self {
        Self {
            finished_at: chrono::Utc::now(),
            fetched: o.fetched,
            after_dedup: o.after_dedup,
            kept: o.kept,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    config: Arc<AppConfig>,
    errors: Arc<ErrorHandler>,
    telemetry: Arc<Telemetry>,
    last_cycle: Arc<RwLock<Option<CycleSummary>>>,
    started: Instant,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, errors: Arc<ErrorHandler>, telemetry: Arc<Telemetry>) -> Self {
        Self {
            config,
            errors,
            telemetry,
            last_cycle: Arc::new(RwLock::new(None)),
            started: Instant::now(),
        }
    }

    pub fn record_cycle(&self, outcome: &CycleOutcome) {
        *self.last_cycle.write() = Some(outcome.into());
    }
}

pub fn create_router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/status", get(status))
        .with_state(state);
    match metrics {
        Some(m) => router.merge(m.router()),
        None => router,
    }
}

#[derive(Debug, Serialize)]
struct SourceCounts {
    total: usize,
    enabled: usize,
    structured: usize,
    #[serde(rename = "static")]
    static_pages: usize,
    dynamic: usize,
}

#[derive(Serialize)]
struct StatusResp {
    uptime_secs: u64,
    sources: SourceCounts,
    filter: FilterSettings,
    interval_minutes: u64,
    last_cycle: Option<CycleSummary>,
    errors: ErrorStats,
    elevated_error_rate: bool,
    system: SystemInfo,
    operations: std::collections::BTreeMap<String, OperationStats>,
}

fn source_counts(cfg: &AppConfig) -> SourceCounts {
    let count = |k: SourceKind| cfg.enabled_sources().filter(|s| s.kind() == k).count();
    SourceCounts {
        total: cfg.sources.len(),
        enabled: cfg.enabled_sources().count(),
        structured: count(SourceKind::Structured),
        static_pages: count(SourceKind::Static),
        dynamic: count(SourceKind::Dynamic),
    }
}

async fn status(State(state): State<AppState>) -> Json<StatusResp> {
    Json(StatusResp {
        uptime_secs: state.started.elapsed().as_secs(),
        sources: source_counts(&state.config),
        filter: state.config.filter.clone(),
        interval_minutes: state.config.delivery.interval_minutes,
        last_cycle: state.last_cycle.read().clone(),
        errors: state.errors.stats(),
        elevated_error_rate: state.errors.elevated_error_rate(),
        system: state.telemetry.system_info(),
        operations: state.telemetry.all_stats(),
    })
}
