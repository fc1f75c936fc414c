// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod article;
pub mod config;
pub mod delivery;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod notify;
pub mod relevance;
pub mod resilience;
pub mod telemetry;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::article::Article;
pub use crate::config::{load_config_default, load_config_from, AppConfig, SourceConfig};
pub use crate::delivery::{DeliveryDriver, DeliverySink, LogSink};
pub use crate::error::PipelineError;
pub use crate::ingest::{CycleOutcome, FeedAdapter, PageAdapter, Pipeline};
pub use crate::notify::{DiscordWebhook, Notifier, NotifierMux, OperatorAlert};
pub use crate::relevance::{Lexicon, RelevanceScorer};
pub use crate::resilience::{ErrorHandler, ResilienceContext, Severity};
pub use crate::telemetry::Telemetry;
