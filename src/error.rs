//! Benchmark-level error taxonomy.
//!
//! `Configuration` (and total provider unavailability, surfaced as `Resource`
//! at manager construction) aborts the run. Everything else is caught at the
//! smallest meaningful unit - one iteration, one judge call, one
//! (model, task) pair - logged, and recorded so the rest of the matrix keeps
//! progressing.

use thiserror::Error;

use crate::provider::ProviderError;

pub type Result<T> = std::result::Result<T, BenchError>;

#[derive(Debug, Error)]
pub enum BenchError {
    /// Invalid or incomplete configuration. Fatal, pre-run.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Model activation or availability failure.
    #[error("resource error for {model}: {message}")]
    Resource { model: String, message: String },

    /// Single provider call failure.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// No parseable artifact in a model response.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// Screenshot capture failure.
    #[error("rendering failed: {0}")]
    Rendering(String),

    /// Judge call or structured-parse failure, scoped to one (judge, iteration).
    #[error("evaluation by {judge} at iteration {iteration} failed: {message}")]
    Evaluation {
        judge: String,
        iteration: u32,
        message: String,
    },

    /// Persisted-layout I/O failure.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl BenchError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn resource(model: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Resource {
            model: model.into(),
            message: message.into(),
        }
    }

    pub fn extraction(message: impl Into<String>) -> Self {
        Self::Extraction(message.into())
    }

    pub fn rendering(message: impl Into<String>) -> Self {
        Self::Rendering(message.into())
    }

    pub fn evaluation(judge: impl Into<String>, iteration: u32, message: impl Into<String>) -> Self {
        Self::Evaluation {
            judge: judge.into(),
            iteration,
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
