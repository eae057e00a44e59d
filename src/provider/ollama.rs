//! Ollama backend: local models with genuine multi-turn memory.
//!
//! The adapter keeps a per-model message log so follow-up calls only need the
//! new turn; the accumulated log is replayed to `/api/chat` on every request.
//! Eviction clears the log through [`ModelProvider::clear_history`].

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::error::ProviderError;
use super::types::*;
use super::{require_json, ModelProvider};

#[derive(Debug)]
pub struct OllamaProvider {
    client: reqwest::Client,
    host: String,
    histories: Mutex<HashMap<String, Vec<ChatMessage>>>,
}

impl OllamaProvider {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            host: host.into().trim_end_matches('/').to_string(),
            histories: Mutex::new(HashMap::new()),
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.host)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.host)
    }

    async fn chat(
        &self,
        req: &GenerateRequest,
        format: Option<&'static str>,
    ) -> Result<GenerateResponse, ProviderError> {
        let start = Instant::now();

        let mut messages: Vec<ChatMessage> = Vec::new();
        if let Some(system) = &req.system {
            messages.push(ChatMessage::text("system", system));
        }
        if req.use_history {
            let histories = self.histories.lock().await;
            if let Some(log) = histories.get(&req.model) {
                messages.extend(log.iter().cloned());
            }
        }

        let user_message = ChatMessage::user(&req.prompt, req.image.as_ref())?;
        messages.push(user_message.clone());

        let api_req = ChatApiRequest {
            model: &req.model,
            messages: &messages,
            stream: false,
            format,
            options: ApiOptions {
                temperature: req.options.temperature,
                num_ctx: req.options.num_ctx,
                num_predict: req.options.num_predict,
            },
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
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::provider(
                "ollama",
                format!("HTTP {}: {body}", status.as_u16()),
                status.as_u16() >= 500,
            ));
        }

        let parsed: ChatApiResponse = response.json().await.map_err(|e| {
            ProviderError::provider("ollama", format!("Invalid response: {e}"), false)
        })?;

        let content = parsed
            .message
            .map(|m| m.content)
            .ok_or_else(|| ProviderError::provider("ollama", "Missing message in response", false))?;

        // Record the exchange so the next call can build on it.
        if req.use_history {
            let mut histories = self.histories.lock().await;
            let log = histories.entry(req.model.clone()).or_default();
            log.push(user_message);
            log.push(ChatMessage::text("assistant", &content));
        }

        Ok(GenerateResponse {
            content,
            duration: start.elapsed(),
            input_tokens: parsed.prompt_eval_count,
            output_tokens: parsed.eval_count,
        })
    }
}

// =============================================================================
// API TYPES
// =============================================================================

#[derive(Serialize)]
struct ChatApiRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    format: Option<&'static str>,
    options: ApiOptions,
}

#[derive(Serialize)]
struct ApiOptions {
    temperature: f32,
    num_ctx: u32,
    num_predict: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

impl ChatMessage {
    fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
            images: None,
        }
    }

    fn user(content: &str, image: Option<&ImageRef>) -> Result<Self, ProviderError> {
        let images = match image {
            Some(img) => Some(vec![img.read_base64()?]),
            None => None,
        };
        Ok(Self {
            role: "user".to_string(),
            content: content.to_string(),
            images,
        })
    }
}

#[derive(Deserialize)]
struct ChatApiResponse {
    message: Option<ResponseMessage>,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

// =============================================================================
// MODEL PROVIDER IMPL
// =============================================================================

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn is_available(&self) -> bool {
        match self.client.get(self.tags_url()).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        let response = self.client.get(self.tags_url()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::provider(
                "ollama",
                format!("HTTP {} listing models", status.as_u16()),
                status.as_u16() >= 500,
            ));
        }
        let parsed: TagsResponse = response.json().await?;
        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        let format = req.json_mode.then_some("json");
        self.chat(req, format).await
    }

    async fn generate_structured(
        &self,
        req: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        let resp = self.chat(req, Some("json")).await?;
        require_json(&resp.content)?;
        Ok(resp)
    }

    async fn clear_history(&self, model: Option<&str>) {
        let mut histories = self.histories.lock().await;
        match model {
            Some(name) => {
                histories.remove(name);
            }
            None => histories.clear(),
        }
    }
}
