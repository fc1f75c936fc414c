// src/telemetry.rs
//! Per-operation timing and memory tracking with threshold warnings.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, warn};

pub const HISTORY_CAPACITY: usize = 100;
pub const DEFAULT_THRESHOLD: Duration = Duration::from_secs(15);
pub const MEMORY_WARNING_BYTES: i64 = 10 * 1024 * 1024;
const RECENT_IN_STATS: usize = 10;

pub type OperationId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "error", rename_all = "lowercase")]
pub enum OperationResult {
    Success,
    Failure(String),
}

impl OperationResult {
    pub fn from_result<T, E: std::fmt::Display>(r: &Result<T, E>) -> Self {
        match r {
            Ok(_) => Self::Success,
            Err(e) => Self::Failure(e.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationMetric {
    pub operation: String,
    pub duration: Duration,
    pub memory_delta_bytes: i64,
    pub timestamp: DateTime<Utc>,
    pub metadata: Value,
    pub result: OperationResult,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum WarningKind {
    SlowOperation { threshold: Duration },
    MemoryGrowth { threshold_bytes: i64 },
}

#[derive(Debug, Clone)]
pub enum TelemetryEvent {
    OperationComplete(OperationMetric),
    PerformanceWarning {
        kind: WarningKind,
        metric: OperationMetric,
    },
}

/// Observer for telemetry events. Any `Fn(&TelemetryEvent)` closure works.
pub trait TelemetrySubscriber: Send + Sync {
    fn on_event(&self, event: &TelemetryEvent);
}

impl<F> TelemetrySubscriber for F
where
    F: Fn(&TelemetryEvent) + Send + Sync,
{
    fn on_event(&self, event: &TelemetryEvent) {
        self(event)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationStats {
    pub count: usize,
    pub avg_duration: Duration,
    pub min_duration: Duration,
    pub max_duration: Duration,
    pub avg_memory_delta_bytes: i64,
    pub recent: Vec<OperationMetric>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub uptime_secs: u64,
    pub resident_memory_bytes: u64,
    pub virtual_memory_bytes: u64,
    pub active_operations: usize,
    pub timestamp: DateTime<Utc>,
}

struct ActiveOp {
    operation: String,
    started: Instant,
    start_memory: u64,
    metadata: Value,
}

pub struct Telemetry {
    next_id: AtomicU64,
    active: Mutex<HashMap<OperationId, ActiveOp>>,
    history: Mutex<HashMap<String, VecDeque<OperationMetric>>>,
    thresholds: RwLock<HashMap<String, Duration>>,
    memory_warning_bytes: i64,
    subscribers: RwLock<Vec<Arc<dyn TelemetrySubscriber>>>,
    system: Mutex<System>,
    pid: Option<Pid>,
    started: Instant,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}

impl Telemetry {
    pub fn new() -> Self {
        let thresholds = [
            ("feed_fetch", 30),
            ("page_scrape", 60),
            ("relevance_filter", 5),
            ("delivery", 10),
        ]
        .into_iter()
        .map(|(k, s)| (k.to_string(), Duration::from_secs(s)))
        .collect();

        Self {
            next_id: AtomicU64::new(1),
            active: Mutex::new(HashMap::new()),
            history: Mutex::new(HashMap::new()),
            thresholds: RwLock::new(thresholds),
            memory_warning_bytes: MEMORY_WARNING_BYTES,
            subscribers: RwLock::new(Vec::new()),
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            started: Instant::now(),
        }
    }

    pub fn with_memory_warning(mut self, bytes: i64) -> Self {
        self.memory_warning_bytes = bytes;
        self
    }

    pub fn set_threshold(&self, operation: &str, limit: Duration) {
        self.thresholds.write().insert(operation.to_string(), limit);
    }

    pub fn threshold(&self, operation: &str) -> Duration {
        self.thresholds
            .read()
            .get(operation)
            .copied()
            .unwrap_or(DEFAULT_THRESHOLD)
    }

    pub fn subscribe(&self, subscriber: impl TelemetrySubscriber + 'static) {
        self.subscribers.write().push(Arc::new(subscriber));
    }

    pub fn start(&self, operation: &str, metadata: Value) -> OperationId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let start_memory = self.sample_memory().0;
        self.active.lock().insert(
            id,
            ActiveOp {
                operation: operation.to_string(),
                started: Instant::now(),
                start_memory,
                metadata,
            },
        );
        debug!(target: "telemetry", id, operation, "operation started");
        id
    }

    /// Close an operation. Unknown ids are logged and yield `None`.
    pub fn end(&self, id: OperationId, result: OperationResult) -> Option<OperationMetric> {
        let Some(op) = self.active.lock().remove(&id) else {
            warn!(target: "telemetry", id, "end() for unknown operation id");
            return None;
        };
        let end_memory = self.sample_memory().0;
        let metric = OperationMetric {
            operation: op.operation,
            duration: op.started.elapsed(),
            memory_delta_bytes: end_memory as i64 - op.start_memory as i64,
            timestamp: Utc::now(),
            metadata: op.metadata,
            result,
        };

        {
            let mut h = self.history.lock();
            let q = h.entry(metric.operation.clone()).or_default();
            q.push_back(metric.clone());
            while q.len() > HISTORY_CAPACITY {
                q.pop_front();
            }
        }

        let threshold = self.threshold(&metric.operation);
        if metric.duration > threshold {
            warn!(
                target: "telemetry",
                operation = %metric.operation,
                duration_ms = metric.duration.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "slow operation"
            );
            self.emit(&TelemetryEvent::PerformanceWarning {
                kind: WarningKind::SlowOperation { threshold },
                metric: metric.clone(),
            });
        }
        if metric.memory_delta_bytes > self.memory_warning_bytes {
            warn!(
                target: "telemetry",
                operation = %metric.operation,
                delta_bytes = metric.memory_delta_bytes,
                "memory growth during operation"
            );
            self.emit(&TelemetryEvent::PerformanceWarning {
                kind: WarningKind::MemoryGrowth {
                    threshold_bytes: self.memory_warning_bytes,
                },
                metric: metric.clone(),
            });
        }
        self.emit(&TelemetryEvent::OperationComplete(metric.clone()));
        Some(metric)
    }

    /// Run `fut` between `start` and `end`, recording success or failure.
    pub async fn measure<T, E, F>(&self, operation: &str, metadata: Value, fut: F) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let id = self.start(operation, metadata);
        let out = fut.await;
        self.end(id, OperationResult::from_result(&out));
        out
    }

    pub fn stats(&self, operation: &str) -> Option<OperationStats> {
        let h = self.history.lock();
        let q = h.get(operation).filter(|q| !q.is_empty())?;
        let count = q.len();
        let total: Duration = q.iter().map(|m| m.duration).sum();
        let mem: i64 = q.iter().map(|m| m.memory_delta_bytes).sum();
        Some(OperationStats {
            count,
            avg_duration: total / count as u32,
            min_duration: q.iter().map(|m| m.duration).min().unwrap_or_default(),
            max_duration: q.iter().map(|m| m.duration).max().unwrap_or_default(),
            avg_memory_delta_bytes: mem / count as i64,
            recent: q.iter().rev().take(RECENT_IN_STATS).cloned().collect(),
        })
    }

    pub fn all_stats(&self) -> BTreeMap<String, OperationStats> {
        let names: Vec<String> = self.history.lock().keys().cloned().collect();
        names
            .into_iter()
            .filter_map(|n| self.stats(&n).map(|s| (n, s)))
            .collect()
    }

    pub fn system_info(&self) -> SystemInfo {
        let (rss, virt) = self.sample_memory();
        SystemInfo {
            uptime_secs: self.started.elapsed().as_secs(),
            resident_memory_bytes: rss,
            virtual_memory_bytes: virt,
            active_operations: self.active.lock().len(),
            timestamp: Utc::now(),
        }
    }

    fn emit(&self, event: &TelemetryEvent) {
        let subs = self.subscribers.read().clone();
        for s in subs {
            s.on_event(event);
        }
    }

    /// [`measure`](Self::measure) for stages that cannot fail.
    pub async fn timed<T, F>(&self, operation: &str, metadata: Value, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        let id = self.start(operation, metadata);
        let out = fut.await;
        self.end(id, OperationResult::Success);
        out
    }

    /// Synchronous variant of [`timed`](Self::timed).
    pub fn timed_sync<T>(&self, operation: &str, metadata: Value, f: impl FnOnce() -> T) -> T {
        let id = self.start(operation, metadata);
        let out = f();
        self.end(id, OperationResult::Success);
        out
    }

    /// (resident, virtual) bytes of this process; zeros when unavailable.
    fn sample_memory(&self) -> (u64, u64) {
        let Some(pid) = self.pid else { return (0, 0) };
        let mut sys = self.system.lock();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            false,
            ProcessRefreshKind::new().with_memory(),
        );
        sys.process(pid)
            .map_or((0, 0), |p| (p.memory(), p.virtual_memory()))
    }
}
