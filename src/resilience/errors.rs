// src/resilience/errors.rs
//! Severity-graded error recording, operator escalation and retry.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use crate::error::{error_kind, PipelineError};
use crate::notify::{Notifier, OperatorAlert};

/// Records kept in memory, newest first.
pub const RECENT_CAPACITY: usize = 50;
/// Records inside [`ELEVATED_WINDOW`] above which the rate counts as elevated.
pub const ELEVATED_THRESHOLD: usize = 10;
pub const ELEVATED_WINDOW: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_EMERGENCY_PATH: &str = "emergency-state.json";
const SNAPSHOT_ERRORS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "LOW",
            Severity::Medium => "MEDIUM",
            Severity::High => "HIGH",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub context: String,
    pub kind: String,
    pub severity: Severity,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorStats {
    pub total_errors: u64,
    /// Records from the last 24 hours still held in the recent ring.
    pub recent_errors: usize,
    pub error_counts: BTreeMap<String, u64>,
    pub last_error: Option<ErrorRecord>,
}

/// Written to disk on a CRITICAL error, right before shutdown, as
/// `{timestamp, lastErrors, errorCounts, uptime}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmergencySnapshot {
    pub timestamp: DateTime<Utc>,
    pub last_errors: Vec<ErrorRecord>,
    pub error_counts: BTreeMap<String, u64>,
    /// Seconds since the handler was created.
    #[serde(rename = "uptime")]
    pub uptime_secs: u64,
}

/// Ends the process after a CRITICAL error. Injectable so tests can observe
/// the request instead of dying.
pub trait Terminator: Send + Sync {
    fn terminate(&self, code: i32);
}

pub struct ProcessExit;

impl Terminator for ProcessExit {
    fn terminate(&self, code: i32) {
        std::process::exit(code);
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Sleep after attempt `n` is `base_delay * n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1_000),
        }
    }
}

#[derive(Default)]
struct Ledger {
    recent: VecDeque<ErrorRecord>,
    counts: BTreeMap<String, u64>,
}

pub struct ErrorHandler {
    ledger: Mutex<Ledger>,
    notifier: Option<Arc<dyn Notifier>>,
    emergency_path: PathBuf,
    grace: Duration,
    terminator: Arc<dyn Terminator>,
    terminating: AtomicBool,
    started: Instant,
}

impl Default for ErrorHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorHandler {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger::default()),
            notifier: None,
            emergency_path: PathBuf::from(DEFAULT_EMERGENCY_PATH),
            grace: DEFAULT_GRACE,
            terminator: Arc::new(ProcessExit),
            terminating: AtomicBool::new(false),
            started: Instant::now(),
        }
    }

    pub fn with_notifier(mut self, n: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(n);
        self
    }

    pub fn with_emergency_path(mut self, p: impl Into<PathBuf>) -> Self {
        self.emergency_path = p.into();
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_terminator(mut self, t: Arc<dyn Terminator>) -> Self {
        self.terminator = t;
        self
    }

    pub fn emergency_path(&self) -> &Path {
        &self.emergency_path
    }

    /// Record `err` and escalate by severity. Never fails.
    pub async fn handle_error(
        &self,
        err: &anyhow::Error,
        context: &str,
        severity: Severity,
        metadata: Value,
    ) -> ErrorRecord {
        let record = ErrorRecord {
            timestamp: Utc::now(),
            message: format!("{err:#}"),
            context: context.to_string(),
            kind: error_kind(err).to_string(),
            severity,
            metadata,
        };

        {
            let mut l = self.ledger.lock();
            l.recent.push_front(record.clone());
            l.recent.truncate(RECENT_CAPACITY);
            *l.counts
                .entry(format!("{}:{}", record.context, record.kind))
                .or_insert(0) += 1;
        }
        counter!("resilience_errors_total", "severity" => severity.as_str()).increment(1);
        log_record(&record);

        if severity >= Severity::Medium {
            let alert = OperatorAlert::new(
                severity,
                format!("{severity} error in {context}"),
                record.message.clone(),
            )
            .field("kind", &record.kind)
            .field("time", record.timestamp.to_rfc3339());
            self.notify(&alert).await;
        }

        match severity {
            Severity::High => {
                if self.elevated_error_rate() {
                    warn!(target: "resilience", window_secs = ELEVATED_WINDOW.as_secs(), "elevated error rate");
                    let alert = OperatorAlert::new(
                        Severity::High,
                        "Elevated error rate",
                        format!(
                            "more than {ELEVATED_THRESHOLD} errors in the last {} minutes",
                            ELEVATED_WINDOW.as_secs() / 60
                        ),
                    );
                    self.notify(&alert).await;
                }
            }
            Severity::Critical => self.escalate_critical(&record).await,
            _ => {}
        }

        record
    }

    async fn escalate_critical(&self, record: &ErrorRecord) {
        let alert = OperatorAlert::new(
            Severity::Critical,
            "CRITICAL: news relay is shutting down",
            record.message.clone(),
        )
        .field("context", &record.context)
        .field("grace_secs", self.grace.as_secs());
        self.notify(&alert).await;

        if let Err(e) = self.save_emergency_state() {
            error!(target: "resilience", error = %format!("{e:#}"), "emergency snapshot failed");
        }

        if self.terminating.swap(true, Ordering::SeqCst) {
            return;
        }
        let grace = self.grace;
        let terminator = self.terminator.clone();
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            terminator.terminate(1);
        });
    }

    async fn notify(&self, alert: &OperatorAlert) {
        let Some(n) = &self.notifier else { return };
        if let Err(e) = n.notify(alert).await {
            warn!(target: "resilience", notifier = n.name(), error = %e, "operator notification failed");
        }
    }

    /// Run `op` up to `policy.max_retries` times. Non-final failures are
    /// recorded LOW, the final one HIGH; the last error is returned with a
    /// [`PipelineError::RetryExhausted`] context on top.
    pub async fn retry<T, F, Fut>(&self, context: &str, policy: RetryPolicy, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max = policy.max_retries.max(1);
        let mut attempt: u32 = 1;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if attempt < max => {
                    let meta = serde_json::json!({ "attempt": attempt, "max_retries": max });
                    self.handle_error(&e, context, Severity::Low, meta).await;
                    tokio::time::sleep(policy.base_delay * attempt).await;
                    attempt += 1;
                }
                Err(e) => {
                    let meta = serde_json::json!({ "attempt": attempt, "max_retries": max });
                    self.handle_error(&e, context, Severity::High, meta).await;
                    return Err(e.context(PipelineError::RetryExhausted {
                        context: context.to_string(),
                        attempts: max,
                    }));
                }
            }
        }
    }

    /// More than [`ELEVATED_THRESHOLD`] records within [`ELEVATED_WINDOW`].
    pub fn elevated_error_rate(&self) -> bool {
        let cutoff = Utc::now() - window(ELEVATED_WINDOW);
        let l = self.ledger.lock();
        l.recent.iter().filter(|r| r.timestamp > cutoff).count() > ELEVATED_THRESHOLD
    }

    pub fn stats(&self) -> ErrorStats {
        let cutoff = Utc::now() - ChronoDuration::hours(24);
        let l = self.ledger.lock();
        ErrorStats {
            total_errors: l.counts.values().sum(),
            recent_errors: l.recent.iter().filter(|r| r.timestamp > cutoff).count(),
            error_counts: l.counts.clone(),
            last_error: l.recent.front().cloned(),
        }
    }

    /// Up to `n` most recent records, newest first.
    pub fn recent(&self, n: usize) -> Vec<ErrorRecord> {
        self.ledger.lock().recent.iter().take(n).cloned().collect()
    }

    pub fn count_with_severity(&self, severity: Severity) -> usize {
        self.ledger
            .lock()
            .recent
            .iter()
            .filter(|r| r.severity == severity)
            .count()
    }

    pub fn snapshot(&self) -> EmergencySnapshot {
        let l = self.ledger.lock();
        EmergencySnapshot {
            timestamp: Utc::now(),
            last_errors: l.recent.iter().take(SNAPSHOT_ERRORS).cloned().collect(),
            error_counts: l.counts.clone(),
            uptime_secs: self.started.elapsed().as_secs(),
        }
    }

    /// Write [`EmergencySnapshot`] as pretty JSON to the emergency path.
    pub fn save_emergency_state(&self) -> Result<PathBuf> {
        let snap = self.snapshot();
        let json = serde_json::to_string_pretty(&snap)?;
        std::fs::write(&self.emergency_path, json)
            .with_context(|| format!("writing {}", self.emergency_path.display()))?;
        info!(target: "resilience", path = %self.emergency_path.display(), "emergency state saved");
        Ok(self.emergency_path.clone())
    }
}

fn window(d: Duration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or_else(|_| ChronoDuration::minutes(5))
}

fn log_record(r: &ErrorRecord) {
    match r.severity {
        Severity::Low => {
            info!(target: "resilience", context = %r.context, kind = %r.kind, severity = %r.severity, "{}", r.message)
        }
        Severity::Medium => {
            warn!(target: "resilience", context = %r.context, kind = %r.kind, severity = %r.severity, "{}", r.message)
        }
        Severity::High => {
            error!(target: "resilience", context = %r.context, kind = %r.kind, severity = %r.severity, "{}", r.message)
        }
        Severity::Critical => {
            error!(target: "resilience", context = %r.context, kind = %r.kind, severity = %r.severity, fatal = true, "{}", r.message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use serde_json::json;

    #[tokio::test]
    async fn records_newest_first_and_counts_by_context_kind() {
        let h = ErrorHandler::new();
        h.handle_error(&anyhow!("first"), "feed", Severity::Low, Value::Null).await;
        let src = anyhow::Error::new(PipelineError::source_failure("x", "down"));
        h.handle_error(&src, "feed", Severity::Low, json!({"url": "u"})).await;

        let recent = h.recent(5);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].kind, "SourceFailure");
        assert_eq!(recent[1].message, "first");

        let stats = h.stats();
        assert_eq!(stats.total_errors, 2);
        assert_eq!(stats.error_counts.get("feed:Error"), Some(&1));
        assert_eq!(stats.error_counts.get("feed:SourceFailure"), Some(&1));
        assert_eq!(stats.recent_errors, 2);
        assert_eq!(stats.last_error.unwrap().kind, "SourceFailure");
    }

    #[tokio::test]
    async fn ring_is_bounded() {
        let h = ErrorHandler::new();
        for i in 0..(RECENT_CAPACITY + 5) {
            h.handle_error(&anyhow!("e{i}"), "x", Severity::Low, Value::Null).await;
        }
        assert_eq!(h.recent(usize::MAX).len(), RECENT_CAPACITY);
        assert_eq!(h.stats().total_errors, (RECENT_CAPACITY + 5) as u64);
        assert!(h.elevated_error_rate());
    }

    #[test]
    fn severity_orders_and_serializes_uppercase() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::Medium > Severity::Low);
        assert_eq!(serde_json::to_string(&Severity::High).unwrap(), "\"HIGH\"");
    }
}
