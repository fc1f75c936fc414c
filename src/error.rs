//! Error taxonomy for the ingestion pipeline.

use std::time::Duration;

use thiserror::Error;

/// Failures the pipeline distinguishes when reporting to the error handler.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Network, status or parse failure scoped to one adapter call.
    #[error("source `{source_name}` failed: {reason}")]
    SourceFailure { source_name: String, reason: String },

    /// No candidate selector matched, or no element survived acceptance.
    #[error("no usable elements on `{source_name}` (tried: {})", .tried.join(" | "))]
    ExtractionFailure {
        source_name: String,
        tried: Vec<String>,
    },

    /// A per-operation hard cutoff expired.
    #[error("`{operation}` timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// The last attempt of a retried operation failed.
    #[error("{context} failed after {attempts} attempts")]
    RetryExhausted { context: String, attempts: u32 },
}

impl PipelineError {
    pub fn source_failure(source_name: impl Into<String>, reason: impl ToString) -> Self {
        Self::SourceFailure {
            source_name: source_name.into(),
            reason: reason.to_string(),
        }
    }

    /// Short variant name, used as the error kind in occurrence counters.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SourceFailure { .. } => "SourceFailure",
            Self::ExtractionFailure { .. } => "ExtractionFailure",
            Self::Timeout { .. } => "Timeout",
            Self::RetryExhausted { .. } => "RetryExhausted",
        }
    }
}

/// Classify an error chain for the `context:kind` counters.
pub fn error_kind(err: &anyhow::Error) -> &'static str {
    if let Some(p) = err.downcast_ref::<PipelineError>() {
        return p.kind();
    }
    for cause in err.chain() {
        if let Some(r) = cause.downcast_ref::<reqwest::Error>() {
            return if r.is_timeout() { "Timeout" } else { "Http" };
        }
        if cause.is::<quick_xml::de::DeError>() {
            return "Parse";
        }
        if cause.is::<std::io::Error>() {
            return "Io";
        }
    }
    "Error"
}
