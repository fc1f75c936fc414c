pub mod discord;

pub use discord::DiscordWebhook;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::resilience::Severity;

/// Message for a human operator about the pipeline itself (not content).
#[derive(Debug, Clone)]
pub struct OperatorAlert {
    pub severity: Severity,
    pub title: String,
    pub message: String,
    /// Extra key/value lines (context, error kind, counters).
    pub fields: Vec<(String, String)>,
    pub timestamp: DateTime<Utc>,
}

impl OperatorAlert {
    pub fn new(severity: Severity, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity,
            title: title.into(),
            message: message.into(),
            fields: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.fields.push((key.into(), value.to_string()));
        self
    }

    pub fn is_urgent(&self) -> bool {
        self.severity == Severity::Critical
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;
    async fn notify(&self, alert: &OperatorAlert) -> Result<()>;
}

/// Sends each alert to every registered notifier; one failing target does
/// not stop the others.
#[derive(Default, Clone)]
pub struct NotifierMux {
    targets: Vec<Arc<dyn Notifier>>,
}

impl NotifierMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, n: Arc<dyn Notifier>) -> Self {
        self.targets.push(n);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl Notifier for NotifierMux {
    fn name(&self) -> &'static str {
        "mux"
    }

    async fn notify(&self, alert: &OperatorAlert) -> Result<()> {
        let sends = self.targets.iter().map(|t| async move {
            if let Err(e) = t.notify(alert).await {
                warn!(target: "delivery", notifier = t.name(), error = %e, "operator notification failed");
                false
            } else {
                true
            }
        });
        let results = futures::future::join_all(sends).await;
        if !results.is_empty() && results.iter().all(|ok| !ok) {
            anyhow::bail!("all {} notifiers failed", results.len());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recording(Mutex<Vec<String>>);

    #[async_trait]
    impl Notifier for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }
        async fn notify(&self, alert: &OperatorAlert) -> Result<()> {
            self.0.lock().push(alert.title.clone());
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Notifier for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }
        async fn notify(&self, _alert: &OperatorAlert) -> Result<()> {
            anyhow::bail!("down")
        }
    }

    #[tokio::test]
    async fn mux_reaches_healthy_targets_past_a_failing_one() {
        let rec = Arc::new(Recording(Mutex::new(vec![])));
        let mux = NotifierMux::new()
            .with(Arc::new(Failing))
            .with(rec.clone());
        let alert = OperatorAlert::new(Severity::High, "feed down", "boom").field("context", "feed");
        mux.notify(&alert).await.unwrap();
        assert_eq!(rec.0.lock().as_slice(), &["feed down".to_string()]);

        let only_failing = NotifierMux::new().with(Arc::new(Failing));
        assert!(only_failing.notify(&alert).await.is_err());
    }
}
