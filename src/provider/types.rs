//! Core types for model providers.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use super::error::ProviderError;

/// Conversation turn role.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// Reference to an image on disk (screenshot of a rendered artifact).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageRef(pub PathBuf);

impl ImageRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Read the image and encode it as base64 for inline transport.
    pub fn read_base64(&self) -> Result<String, ProviderError> {
        let bytes = std::fs::read(&self.0).map_err(|e| {
            ProviderError::invalid_request(format!(
                "cannot read image {}: {e}",
                self.0.display()
            ))
        })?;
        Ok(BASE64.encode(bytes))
    }
}

/// One turn of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    /// Image attached to this turn (user turns only in practice).
    pub image: Option<ImageRef>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: None,
        }
    }

    pub fn user_with_image(text: impl Into<String>, image: ImageRef) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            image: Some(image),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            image: None,
        }
    }
}

/// Concrete sampling and budget options for one call.
///
/// The resource manager builds these from per-model defaults and applies
/// per-call overrides on top.
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    /// Sampling temperature.
    pub temperature: f32,
    /// Context window size in tokens.
    pub num_ctx: u32,
    /// Max tokens to generate (-1 for unlimited).
    pub num_predict: i32,
    /// Per-call network timeout.
    pub timeout: Duration,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            temperature: 0.1,
            num_ctx: 32_768,
            num_predict: -1,
            timeout: Duration::from_secs(300),
        }
    }
}

/// Per-call overrides merged over a model's configured defaults.
#[derive(Debug, Clone, Default)]
pub struct CallOverrides {
    pub temperature: Option<f32>,
    pub num_ctx: Option<u32>,
    pub num_predict: Option<i32>,
    pub timeout: Option<Duration>,
}

impl GenerateOptions {
    pub fn merge(mut self, overrides: &CallOverrides) -> Self {
        if let Some(t) = overrides.temperature {
            self.temperature = t;
        }
        if let Some(c) = overrides.num_ctx {
            self.num_ctx = c;
        }
        if let Some(p) = overrides.num_predict {
            self.num_predict = p;
        }
        if let Some(t) = overrides.timeout {
            self.timeout = t;
        }
        self
    }
}

/// Request for a generation call.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Model identifier (provider-scoped).
    pub model: String,
    /// The prompt for this turn.
    pub prompt: String,
    /// Optional system prompt.
    pub system: Option<String>,
    /// Image attached to this turn.
    pub image: Option<ImageRef>,
    /// Prior conversation turns. Stateless backends flatten these into the
    /// wire payload; backends with native memory may ignore them.
    pub history: Vec<Turn>,
    /// Whether this call participates in a multi-turn conversation.
    pub use_history: bool,
    /// Whether to constrain output to JSON.
    pub json_mode: bool,
    /// Resolved call options.
    pub options: GenerateOptions,
}

impl GenerateRequest {
    pub fn new(model: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            prompt: prompt.into(),
            system: None,
            image: None,
            history: Vec::new(),
            use_history: false,
            json_mode: false,
            options: GenerateOptions::default(),
        }
    }

    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    pub fn image(mut self, image: ImageRef) -> Self {
        self.image = Some(image);
        self
    }

    pub fn history(mut self, history: Vec<Turn>) -> Self {
        self.history = history;
        self.use_history = true;
        self
    }

    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    pub fn options(mut self, options: GenerateOptions) -> Self {
        self.options = options;
        self
    }
}

/// Response from a generation call.
#[derive(Debug, Clone)]
pub struct GenerateResponse {
    /// Generated text.
    pub content: String,
    /// Time taken for the request.
    pub duration: Duration,
    /// Input tokens consumed, if reported.
    pub input_tokens: Option<u32>,
    /// Output tokens generated, if reported.
    pub output_tokens: Option<u32>,
}
