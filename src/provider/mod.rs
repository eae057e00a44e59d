//! Uniform interface over heterogeneous model backends.
//!
//! Two backend shapes are supported: a local backend with genuine multi-turn
//! memory (Ollama) and a stateless request/response backend (OpenRouter).
//! Callers depend only on the [`ModelProvider`] trait; [`create_provider`]
//! selects the concrete implementation from configuration.

pub mod error;
pub mod ollama;
pub mod openrouter;
pub mod types;

use std::sync::Arc;

pub use error::{ErrorContext, ProviderError};
pub use ollama::OllamaProvider;
pub use openrouter::OpenRouterProvider;
pub use types::{
    CallOverrides, GenerateOptions, GenerateRequest, GenerateResponse, ImageRef, Role, Turn,
};

use crate::config::{ProviderConfig, ProviderKind};

/// Capability interface implemented once per backend.
#[async_trait::async_trait]
pub trait ModelProvider: Send + Sync {
    /// Whether the backend is reachable and properly configured.
    async fn is_available(&self) -> bool;

    /// List the models the backend can serve.
    async fn list_models(&self) -> Result<Vec<String>, ProviderError>;

    /// Generate free-form text.
    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError>;

    /// Generate output constrained to JSON. The returned content is
    /// guaranteed to parse as JSON; callers apply their own schema on top.
    async fn generate_structured(
        &self,
        req: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError>;

    /// Clear conversation memory for one model, or all models when `None`.
    /// No-op for stateless backends.
    async fn clear_history(&self, model: Option<&str>);
}

/// Build the configured backend.
pub fn create_provider(config: &ProviderConfig) -> Result<Arc<dyn ModelProvider>, ProviderError> {
    match config.kind {
        ProviderKind::Ollama => Ok(Arc::new(OllamaProvider::new(
            &config.host,
            config.timeout(),
        )?)),
        ProviderKind::OpenRouter => {
            let api_key = config
                .api_key
                .clone()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .ok_or_else(|| ProviderError::config("OpenRouter API key not set"))?;
            Ok(Arc::new(OpenRouterProvider::new(
                api_key,
                &config.host,
                config.timeout(),
            )?))
        }
    }
}

/// Verify that `content` parses as a JSON document.
///
/// Shared by backends that can only *request* JSON output but cannot
/// guarantee the model complied.
pub(crate) fn require_json(content: &str) -> Result<(), ProviderError> {
    let trimmed = strip_json_fence(content);
    serde_json::from_str::<serde_json::Value>(trimmed)
        .map(|_| ())
        .map_err(|e| {
            ProviderError::provider("structured", format!("response is not valid JSON: {e}"), false)
        })
}

/// Some models wrap JSON output in a markdown fence even in JSON mode.
pub(crate) fn strip_json_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|s| s.strip_suffix("```"));
    inner.map(str::trim).unwrap_or(trimmed)
}
