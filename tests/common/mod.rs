//! Shared test doubles.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use pixelbench::config::ModelConfig;
use pixelbench::generation::ArtifactContent;
use pixelbench::manager::{MemoryProbe, ModelResourceManager};
use pixelbench::provider::{
    GenerateRequest, GenerateResponse, ImageRef, ModelProvider, ProviderError,
};
use pixelbench::render::Renderer;

/// Scripted provider: every `generate*` call pops the next queued reply, in
/// order, regardless of model. Remember that each model activation consumes
/// one reply for the warm-up call.
pub struct MockProvider {
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    pub requests: Mutex<Vec<GenerateRequest>>,
    pub history_clears: Mutex<Vec<Option<String>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            history_clears: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, content: impl Into<String>) -> Self {
        self.script.lock().unwrap().push_back(Ok(content.into()));
        self
    }

    pub fn error(self, retryable: bool) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Err(ProviderError::provider("mock", "scripted failure", retryable)));
        self
    }

    fn next(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.requests.lock().unwrap().push(req.clone());
        let scripted = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("mock script exhausted at request {:?}", req.prompt));
        scripted.map(|content| GenerateResponse {
            content,
            duration: Duration::from_millis(5),
            input_tokens: None,
            output_tokens: None,
        })
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn is_available(&self) -> bool {
        true
    }

    async fn list_models(&self) -> Result<Vec<String>, ProviderError> {
        Ok(Vec::new())
    }

    async fn generate(&self, req: &GenerateRequest) -> Result<GenerateResponse, ProviderError> {
        self.next(req)
    }

    async fn generate_structured(
        &self,
        req: &GenerateRequest,
    ) -> Result<GenerateResponse, ProviderError> {
        self.next(req)
    }

    async fn clear_history(&self, model: Option<&str>) {
        self.history_clears
            .lock()
            .unwrap()
            .push(model.map(str::to_string));
    }
}

/// Renderer that "captures" by touching the output file.
pub struct StubRenderer;

#[async_trait]
impl Renderer for StubRenderer {
    async fn render(
        &self,
        _content: &ArtifactContent,
        output: &Path,
    ) -> pixelbench::Result<ImageRef> {
        std::fs::write(output, b"png")?;
        Ok(ImageRef::new(output))
    }
}

/// Memory probe reporting a fixed usage fraction.
pub struct FixedProbe(pub f64);

impl MemoryProbe for FixedProbe {
    fn usage_fraction(&mut self) -> f64 {
        self.0
    }

    fn used_mb(&mut self) -> f64 {
        1024.0
    }
}

pub fn model(name: &str) -> ModelConfig {
    ModelConfig {
        name: name.to_string(),
        temperature: 0.1,
        num_ctx: 4096,
        num_predict: -1,
        timeout_secs: 30,
        max_retries: 2,
    }
}

pub async fn manager_with(
    provider: std::sync::Arc<MockProvider>,
    models: &[&str],
    capacity: usize,
    memory_fraction: f64,
) -> ModelResourceManager {
    ModelResourceManager::new(
        provider,
        models.iter().map(|m| model(m)).collect(),
        capacity,
        0.8,
        Box::new(FixedProbe(memory_fraction)),
    )
    .await
    .unwrap()
}
