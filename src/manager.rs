//! Resource-aware model lifecycle management.
//!
//! At most `capacity` models are active at once (typically 1: the limiting
//! resource is host memory occupied by a loaded model, not CPU). Activation
//! evicts the least-recently-used model when at capacity, purges down to the
//! most-recently-used under memory pressure, and confirms reachability with a
//! minimal warm-up call. Repeated call failures force-evict instead of
//! retrying in place forever.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use sysinfo::System;
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::{BenchError, Result};
use crate::provider::{
    CallOverrides, GenerateOptions, GenerateRequest, GenerateResponse, ImageRef, ModelProvider,
    Turn,
};

// =============================================================================
// Memory probe
// =============================================================================

/// Seam over system memory readings so tests can inject fixed values.
pub trait MemoryProbe: Send + Sync {
    /// Used fraction of total system memory, in [0, 1].
    fn usage_fraction(&mut self) -> f64;
    /// Used memory in megabytes.
    fn used_mb(&mut self) -> f64;
}

/// Live readings via sysinfo.
pub struct SystemMemoryProbe {
    system: System,
}

impl SystemMemoryProbe {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn usage_fraction(&mut self) -> f64 {
        self.system.refresh_memory();
        let total = self.system.total_memory();
        if total == 0 {
            return 0.0;
        }
        self.system.used_memory() as f64 / total as f64
    }

    fn used_mb(&mut self) -> f64 {
        self.system.refresh_memory();
        self.system.used_memory() as f64 / (1024.0 * 1024.0)
    }
}

// =============================================================================
// Runtime state
// =============================================================================

/// Mutable per-model runtime state. Created at manager init, reset on
/// eviction, never destroyed.
#[derive(Debug, Clone, Default)]
pub struct ModelRuntimeState {
    pub loaded: bool,
    /// Monotonic activity tick; higher means more recently used.
    pub last_used: u64,
    /// Estimated system memory delta observed while warming up, in MB.
    pub memory_delta_mb: f64,
    pub load_duration: Duration,
    pub total_calls: u64,
    pub total_duration: Duration,
    pub consecutive_errors: u32,
}

/// Read-only telemetry snapshot for one model.
#[derive(Debug, Clone, Serialize)]
pub struct ModelStats {
    pub name: String,
    pub loaded: bool,
    pub memory_delta_mb: f64,
    pub load_duration_ms: u64,
    pub total_calls: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: u64,
    pub consecutive_errors: u32,
}

/// One model's prompt-level call, resolved against its configured defaults
/// by the manager.
#[derive(Debug, Clone, Default)]
pub struct Call {
    pub prompt: String,
    pub system: Option<String>,
    pub image: Option<ImageRef>,
    pub history: Vec<Turn>,
    pub use_history: bool,
    pub overrides: CallOverrides,
}

impl Call {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
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

    pub fn overrides(mut self, overrides: CallOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

// =============================================================================
// Manager
// =============================================================================

pub struct ModelResourceManager {
    provider: Arc<dyn ModelProvider>,
    models: HashMap<String, ModelConfig>,
    states: HashMap<String, ModelRuntimeState>,
    capacity: usize,
    memory_threshold: f64,
    probe: Box<dyn MemoryProbe>,
    tick: u64,
}

impl ModelResourceManager {
    /// Build a manager over the configured models.
    ///
    /// Provider unreachability here is fatal: there is no point starting a
    /// long benchmark against a dead backend.
    pub async fn new(
        provider: Arc<dyn ModelProvider>,
        models: Vec<ModelConfig>,
        capacity: usize,
        memory_threshold: f64,
        probe: Box<dyn MemoryProbe>,
    ) -> Result<Self> {
        if !provider.is_available().await {
            return Err(BenchError::resource("*", "provider is not available"));
        }

        let states = models
            .iter()
            .map(|m| (m.name.clone(), ModelRuntimeState::default()))
            .collect();
        let models = models.into_iter().map(|m| (m.name.clone(), m)).collect();

        Ok(Self {
            provider,
            models,
            states,
            capacity: capacity.max(1),
            memory_threshold,
            probe,
            tick: 0,
        })
    }

    fn next_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn config(&self, model: &str) -> Result<&ModelConfig> {
        self.models
            .get(model)
            .ok_or_else(|| BenchError::configuration(format!("model {model} not configured")))
    }

    /// Names of currently active models.
    pub fn active_models(&self) -> Vec<String> {
        let mut active: Vec<(&String, u64)> = self
            .states
            .iter()
            .filter(|(_, s)| s.loaded)
            .map(|(name, s)| (name, s.last_used))
            .collect();
        active.sort_by_key(|(_, last_used)| *last_used);
        active.into_iter().map(|(name, _)| name.clone()).collect()
    }

    /// Make `model` active, evicting as needed, and bump its recency.
    pub async fn ensure_active(&mut self, model: &str) -> Result<()> {
        self.config(model)?;

        if self.states.get(model).map(|s| s.loaded).unwrap_or(false) {
            let tick = self.next_tick();
            if let Some(state) = self.states.get_mut(model) {
                state.last_used = tick;
            }
            return Ok(());
        }

        let active = self.active_models();
        if active.len() >= self.capacity {
            // Strict LRU: active_models() is sorted oldest-first.
            if let Some(lru) = active.first().cloned() {
                info!(model = %lru, "evicting least recently used model");
                self.evict(&lru).await;
            }
        }

        if self.probe.usage_fraction() > self.memory_threshold {
            warn!(threshold = self.memory_threshold, "memory pressure, purging inactive-bound models");
            self.purge_all_but_most_recent().await;
        }

        self.warm_up(model).await
    }

    /// One minimal call to confirm the model is reachable and resident.
    async fn warm_up(&mut self, model: &str) -> Result<()> {
        let config = self.config(model)?.clone();
        info!(model, "activating model");

        let memory_before = self.probe.used_mb();
        let start = Instant::now();

        let req = GenerateRequest::new(model, "Hello").options(GenerateOptions {
            temperature: 0.1,
            num_ctx: 1024,
            num_predict: 1,
            timeout: config.timeout(),
        });

        match self.provider.generate(&req).await {
            Ok(_) => {
                let load_duration = start.elapsed();
                let memory_delta = (self.probe.used_mb() - memory_before).max(0.0);
                let tick = self.next_tick();
                if let Some(state) = self.states.get_mut(model) {
                    state.loaded = true;
                    state.last_used = tick;
                    state.load_duration = load_duration;
                    state.memory_delta_mb = memory_delta;
                }
                info!(
                    model,
                    load_ms = load_duration.as_millis() as u64,
                    memory_delta_mb = memory_delta,
                    "model active"
                );
                Ok(())
            }
            Err(e) => {
                if let Some(state) = self.states.get_mut(model) {
                    state.consecutive_errors += 1;
                }
                Err(BenchError::resource(model, format!("warm-up failed: {e}")))
            }
        }
    }

    /// Evict everything except the most recently used active model.
    async fn purge_all_but_most_recent(&mut self) {
        let active = self.active_models();
        if active.len() <= 1 {
            return;
        }
        for name in &active[..active.len() - 1] {
            self.evict(name).await;
        }
    }

    async fn evict(&mut self, model: &str) {
        self.provider.clear_history(Some(model)).await;
        if let Some(state) = self.states.get_mut(model) {
            state.loaded = false;
            state.memory_delta_mb = 0.0;
        }
        debug!(model, "model evicted");
    }

    /// Invoke a free-form generation for `model`.
    pub async fn invoke(&mut self, model: &str, call: Call) -> Result<GenerateResponse> {
        self.dispatch(model, call, false).await
    }

    /// Invoke a JSON-constrained generation for `model`.
    pub async fn invoke_structured(&mut self, model: &str, call: Call) -> Result<GenerateResponse> {
        self.dispatch(model, call, true).await
    }

    async fn dispatch(
        &mut self,
        model: &str,
        call: Call,
        structured: bool,
    ) -> Result<GenerateResponse> {
        self.ensure_active(model).await?;

        let config = self.config(model)?;
        let options = GenerateOptions {
            temperature: config.temperature,
            num_ctx: config.num_ctx,
            num_predict: config.num_predict,
            timeout: config.timeout(),
        }
        .merge(&call.overrides);
        let failure_budget = config.max_retries;

        let mut req = GenerateRequest {
            model: model.to_string(),
            prompt: call.prompt,
            system: call.system,
            image: call.image,
            history: call.history,
            use_history: call.use_history,
            json_mode: false,
            options,
        };
        if structured {
            req.json_mode = true;
        }

        let result = if structured {
            self.provider.generate_structured(&req).await
        } else {
            self.provider.generate(&req).await
        };

        match result {
            Ok(resp) => {
                let tick = self.next_tick();
                if let Some(state) = self.states.get_mut(model) {
                    state.last_used = tick;
                    state.total_calls += 1;
                    state.total_duration += resp.duration;
                }
                Ok(resp)
            }
            Err(e) => {
                let errors = match self.states.get_mut(model) {
                    Some(state) => {
                        state.consecutive_errors += 1;
                        state.consecutive_errors
                    }
                    None => 0,
                };
                if errors >= failure_budget {
                    warn!(
                        model,
                        errors, "consecutive-failure budget hit, force-evicting for a clean reload"
                    );
                    self.evict(model).await;
                    if let Some(state) = self.states.get_mut(model) {
                        state.consecutive_errors = 0;
                    }
                }
                Err(e.into())
            }
        }
    }

    /// Explicitly deactivate a model.
    pub async fn release(&mut self, model: &str) -> Result<()> {
        self.config(model)?;
        if self.states.get(model).map(|s| s.loaded).unwrap_or(false) {
            self.evict(model).await;
        }
        Ok(())
    }

    /// Telemetry snapshot for one model.
    pub fn stats(&self, model: &str) -> Result<ModelStats> {
        self.config(model)?;
        let state = self.states.get(model).cloned().unwrap_or_default();
        Ok(ModelStats {
            name: model.to_string(),
            loaded: state.loaded,
            memory_delta_mb: state.memory_delta_mb,
            load_duration_ms: state.load_duration.as_millis() as u64,
            total_calls: state.total_calls,
            total_duration_ms: state.total_duration.as_millis() as u64,
            average_duration_ms: state.total_duration.as_millis() as u64
                / state.total_calls.max(1),
            consecutive_errors: state.consecutive_errors,
        })
    }

    /// Telemetry for every configured model.
    pub fn stats_all(&self) -> Vec<ModelStats> {
        let mut names: Vec<&String> = self.models.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|n| self.stats(n).ok())
            .collect()
    }

    /// Clear a model's provider-side conversation memory without evicting.
    pub async fn clear_history(&mut self, model: &str) {
        self.provider.clear_history(Some(model)).await;
    }

    /// Evict every active model.
    pub async fn shutdown(&mut self) {
        info!("shutting down model manager");
        for model in self.active_models() {
            self.evict(&model).await;
        }
    }
}
