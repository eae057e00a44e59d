//! OpenRouter backend: stateless request/response chat completions.
//!
//! OpenRouter has no server-side conversation memory, so every call carries a
//! flattened encoding of the conversation snapshot in its `messages` array.
//! Screenshots travel inline as data-URL image parts.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::error::{ErrorContext, ProviderError};
use super::types::*;
use super::{require_json, ModelProvider};

/// Maximum allowed response content length (4MB - generated projects can be large).
const MAX_RESPONSE_LEN: usize = 4 * 1_024 * 1_024;

/// OpenRouter API adapter.
#[derive(Debug, Clone)]
pub struct OpenRouterProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OpenRouterProvider {
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = api_key.into();
        let base_url = base_url.into();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let auth_value = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .map_err(|_| ProviderError::config("Invalid API key format"))?;
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .gzip(true)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self { client, base_url })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn models_url(&self) -> String {
        format!("{}/models", self.base_url)
    }

    /// Check if message indicates a refusal.
    fn is_refusal(msg: &str) -> bool {
        let l = msg.trim_start().to_lowercase();
        let first_line = l.lines().next().unwrap_or("");

        const PREFIXES: &[&str] = &[
            "refus",
            "i cannot",
            "i can't",
            "i won't",
            "i will not",
            "i am unable to",
            "i'm unable to",
            "unable to comply",
            "unable to assist",
        ];

        PREFIXES.iter().any(|p| first_line.starts_with(p)) || l.contains("request was refused")
    }

    /// Flatten the conversation snapshot plus the current turn into API messages.
    fn build_messages(req: &GenerateRequest) -> Result<Vec<ApiMessage>, ProviderError> {
        let mut messages = Vec::new();

        if let Some(system) = &req.system {
            messages.push(ApiMessage::text("system", system));
        }

        if req.use_history {
            for turn in &req.history {
                messages.push(ApiMessage::from_turn(turn)?);
            }
        }

        let current = Turn {
            role: Role::User,
            text: req.prompt.clone(),
            image: req.image.clone(),
        };
        messages.push(ApiMessage::from_turn(&current)?);

        Ok(messages)
    }

    async fn chat(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let start = Instant::now();
        let messages = Self::build_messages(req)?;

        let api_req = ChatApiRequest {
            model: &req.model,
            messages: &messages,
            temperature: req.options.temperature,
            max_tokens: match req.options.num_predict {
                p if p > 0 => Some(p as u32),
                _ => None,
            },
            response_format: req.json_mode.then_some(ResponseFormat {
                format_type: "json_object",
            }),
        };

        let response = self
            .client
            .post(self.chat_url())
            .timeout(req.options.timeout)
            .json(&api_req)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ProviderError::Timeout(req.options.timeout)
                } else {
                    ProviderError::Http(e)
                }
            })?;

        let status = response.status();
        let body = response.text().await?;

        if body.len() > MAX_RESPONSE_LEN {
            return Err(ProviderError::provider(
                "openrouter",
                format!("Response too large: {} bytes", body.len()),
                false,
            ));
        }

        let ctx = ErrorContext::new().with_status(status.as_u16());

        if !status.is_success() {
            if let Ok(parsed) = serde_json::from_str::<ChatApiResponse>(&body) {
                if let Some(error) = parsed.error {
                    let message = error.message.unwrap_or_default();
                    let ctx = match error.code {
                        Some(code) => ctx.with_code(code),
                        None => ctx,
                    };
                    return Err(match status.as_u16() {
                        429 => ProviderError::rate_limited(Duration::from_secs(60), ctx),
                        _ => ProviderError::provider_with_context(
                            "openrouter",
                            message,
                            status.as_u16() >= 500,
                            ctx,
                        ),
                    });
                }
            }
            return Err(ProviderError::provider_with_context(
                "openrouter",
                format!("HTTP {}", status.as_u16()),
                status.as_u16() >= 500,
                ctx,
            ));
        }

        let parsed: ChatApiResponse = serde_json::from_str(&body).map_err(|e| {
            ProviderError::provider("openrouter", format!("Invalid JSON: {e}"), false)
        })?;

        if let Some(error) = parsed.error {
            let message = error.message.unwrap_or_default();
            if Self::is_refusal(&message) {
                return Err(ProviderError::refused(message));
            }
            return Err(ProviderError::provider("openrouter", message, false));
        }

        let choice = parsed
            .choices
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| {
                ProviderError::provider("openrouter", "No choices in response", false)
            })?;

        let content = choice
            .message
            .and_then(|m| m.content)
            .unwrap_or_default();

        if Self::is_refusal(&content) {
            return Err(ProviderError::refused(content));
        }

        let (input_tokens, output_tokens) = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens))
            .unwrap_or((None, None));

        Ok(GenerateResponse {
            content,
            duration: start.elapsed(),
            input_tokens,
            output_tokens,
        })
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ApiMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: &'static str,
}

#[derive(Serialize)]
struct ApiMessage {
    role: &'static str,
    content: ApiContent,
}

#[derive(Serialize)]
#[serde(untagged)]
enum ApiContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Serialize)]
struct ImageUrl {
    url: String,
}

impl ApiMessage {
    fn text(role: &'static str, content: impl Into<String>) -> Self {
        Self {
            role,
            content: ApiContent::Text(content.into()),
        }
    }

    fn from_turn(turn: &Turn) -> Result<Self, ProviderError> {
        let role = turn.role.as_str();
        match &turn.image {
            None => Ok(Self {
                role,
                content: ApiContent::Text(turn.text.clone()),
            }),
            Some(image) => {
                let b64 = image.read_base64()?;
                Ok(Self {
                    role,
                    content: ApiContent::Parts(vec![
                        ContentPart::Text {
                            text: turn.text.clone(),
                        },
                        ContentPart::ImageUrl {
                            image_url: ImageUrl {
                                url: format!("data:image/png;base64,{b64}"),
                            },
                        },
                    ]),
                })
            }
        }
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    choices: Option<Vec<Choice>>,
    usage: Option<Usage>,
    error: Option<ApiError>,
}

#[derive(Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ApiError {
    message: Option<String>,
    code: Option<String>,
}

#[derive(Deserialize)]
struct ModelsResponse {
    data: Vec<ModelEntry>,
}

#[derive(Deserialize)]
struct ModelEntry {
    id: String,
}

// =============================================================================
// MODEL PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ModelProvider for OpenRouterProvider {
    async fn is_available(&self) -> bool {
        self.list_models().await.is_ok()
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self.client.get(self.models_url()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::provider(
                "openrouter",
                format!("HTTP {} listing models", status.as_u16()),
                status.as_u16() >= 500,
            ));
        }
        let parsed: ModelsResponse = response.json().await?;
        Ok(parsed.data.into_iter().map(|m| m.id).collect())
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.chat(req).await
    }

    async fn generate_structured(
        &self,
        req: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        let mut req = req.clone();
        req.json_mode = true;
        let resp = self.chat(&req).await?;
        require_json(&resp.content)?;
        Ok(resp)
    }

    async fn clear_history(&self, _model: Option<&str>) {
        // Stateless backend - nothing to clear.
    }
}
