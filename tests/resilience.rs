// tests/resilience.rs
//
// Error handler escalation, retry pacing and TTL cache expiry.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use news_relay::error::PipelineError;
use news_relay::notify::{Notifier, OperatorAlert};
use news_relay::resilience::{
    EmergencySnapshot, ErrorHandler, RetryPolicy, Severity, Terminator, TtlCache,
};

#[derive(Default)]
struct RecordingNotifier {
    alerts: Mutex<Vec<OperatorAlert>>,
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn name(&self) -> &'static str {
        "recording"
    }
    async fn notify(&self, alert: &OperatorAlert) -> Result<()> {
        self.alerts.lock().push(alert.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTerminator {
    codes: Mutex<Vec<i32>>,
}

impl Terminator for RecordingTerminator {
    fn terminate(&self, code: i32) {
        self.codes.lock().push(code);
    }
}

#[tokio::test]
async fn cache_entries_expire_after_their_ttl() {
    let cache: TtlCache<String> = TtlCache::new(Duration::from_millis(100));
    cache.set("k", "v".to_string());
    assert_eq!(cache.get("k").as_deref(), Some("v"));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.get("k"), None);
    assert!(cache.is_empty(), "expired entry is removed on read");
}

#[tokio::test(start_paused = true)]
async fn retry_recovers_on_the_third_attempt() {
    let errors = ErrorHandler::new();
    let calls = AtomicU32::new(0);

    let got = errors
        .retry("delivery", RetryPolicy::default(), || async {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 {
                Err(anyhow!("attempt {n} failed"))
            } else {
                Ok(n)
            }
        })
        .await
        .expect("third attempt succeeds");

    assert_eq!(got, 3);
    assert_eq!(errors.count_with_severity(Severity::Low), 2);
    assert_eq!(errors.count_with_severity(Severity::High), 0);
    let recent = errors.recent(2);
    assert_eq!(recent[0].metadata["attempt"], json!(2));
    assert_eq!(recent[1].metadata["attempt"], json!(1));
    assert_eq!(recent[0].metadata["max_retries"], json!(3));
}

#[tokio::test(start_paused = true)]
async fn retry_backs_off_linearly() {
    let errors = ErrorHandler::new();
    let policy = RetryPolicy {
        max_retries: 3,
        base_delay: Duration::from_millis(1_000),
    };
    let t0 = tokio::time::Instant::now();
    let _ = errors
        .retry("delivery", policy, || async { Err::<(), _>(anyhow!("down")) })
        .await;
    // 1s after the first failure, 2s after the second, none after the last.
    let waited = t0.elapsed();
    assert!(waited >= Duration::from_secs(3) && waited < Duration::from_secs(4), "{waited:?}");
}

#[tokio::test(start_paused = true)]
async fn exhausted_retry_keeps_the_root_cause() {
    let errors = ErrorHandler::new();
    let calls = AtomicU32::new(0);

    let err = errors
        .retry("delivery", RetryPolicy::default(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(anyhow!("webhook returned 500"))
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(errors.count_with_severity(Severity::Low), 2);
    assert_eq!(errors.count_with_severity(Severity::High), 1);
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::RetryExhausted { context, attempts }) => {
            assert_eq!(context, "delivery");
            assert_eq!(*attempts, 3);
        }
        other => panic!("expected RetryExhausted, got {other:?}"),
    }
    assert_eq!(err.root_cause().to_string(), "webhook returned 500");
}

#[tokio::test]
async fn low_errors_are_not_sent_to_the_operator() {
    let notifier = Arc::new(RecordingNotifier::default());
    let errors = ErrorHandler::new().with_notifier(notifier.clone());

    errors
        .handle_error(&anyhow!("feed gone"), "feed_fetch", Severity::Low, Value::Null)
        .await;
    assert!(notifier.alerts.lock().is_empty());

    errors
        .handle_error(&anyhow!("sink slow"), "delivery", Severity::Medium, Value::Null)
        .await;
    let alerts = notifier.alerts.lock();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].severity, Severity::Medium);
    assert_eq!(alerts[0].message, "sink slow");
}

#[tokio::test]
async fn high_error_during_a_burst_raises_an_extra_alert() {
    let notifier = Arc::new(RecordingNotifier::default());
    let errors = ErrorHandler::new().with_notifier(notifier.clone());

    for i in 0..10 {
        errors
            .handle_error(&anyhow!("blip {i}"), "feed_fetch", Severity::Low, Value::Null)
            .await;
    }
    assert!(!errors.elevated_error_rate(), "ten records is the threshold, not above it");

    errors
        .handle_error(&anyhow!("delivery down"), "delivery", Severity::High, Value::Null)
        .await;
    assert!(errors.elevated_error_rate());

    let alerts = notifier.alerts.lock();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[1].title, "Elevated error rate");

    let stats = errors.stats();
    assert_eq!(stats.total_errors, 11);
    assert_eq!(stats.error_counts.get("feed_fetch:Error"), Some(&10));
    assert_eq!(stats.error_counts.get("delivery:Error"), Some(&1));
}

#[tokio::test]
async fn critical_error_snapshots_state_and_terminates_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("emergency.json");
    let notifier = Arc::new(RecordingNotifier::default());
    let terminator = Arc::new(RecordingTerminator::default());
    let errors = ErrorHandler::new()
        .with_notifier(notifier.clone())
        .with_terminator(terminator.clone())
        .with_emergency_path(&path)
        .with_grace(Duration::from_millis(50));

    errors
        .handle_error(&anyhow!("parse hiccup"), "feed_fetch", Severity::Low, Value::Null)
        .await;
    errors
        .handle_error(&anyhow!("cycle panicked"), "cycle", Severity::Critical, Value::Null)
        .await;

    let written = std::fs::read_to_string(&path).unwrap();
    let raw: Value = serde_json::from_str(&written).unwrap();
    let keys: Vec<&str> = raw.as_object().unwrap().keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["errorCounts", "lastErrors", "timestamp", "uptime"]);
    assert!(raw["uptime"].is_u64());

    let snapshot: EmergencySnapshot = serde_json::from_str(&written).unwrap();
    assert_eq!(snapshot.last_errors.len(), 2);
    assert_eq!(snapshot.last_errors[0].severity, Severity::Critical);
    assert_eq!(snapshot.error_counts.get("cycle:Error"), Some(&1));

    {
        let alerts = notifier.alerts.lock();
        assert_eq!(alerts.len(), 2, "severity alert plus shutdown alert");
        assert!(alerts.iter().all(|a| a.severity == Severity::Critical));
        assert!(alerts[1].is_urgent());
    }

    assert!(terminator.codes.lock().is_empty(), "grace period first");
    errors
        .handle_error(&anyhow!("again"), "cycle", Severity::Critical, Value::Null)
        .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(*terminator.codes.lock(), vec![1]);
}
