//! End-to-end run orchestration.
//!
//! The orchestrator walks the (model, task) matrix in configuration order,
//! dispatching generation and evaluation according to the execution mode.
//! One pair's failure is recorded and skipped; only configuration errors
//! abort the run. Cleanup always happens, whatever the run outcome.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::aggregate::{benchmark_summary, summarize, TaskSummary};
use crate::config::{BenchConfig, ExecutionMode, ProviderKind, TaskConfig};
use crate::error::{BenchError, Result};
use crate::generation::{GenerationArtifact, GenerationLoop};
use crate::judge::{EvaluationRecord, JudgePanel};
use crate::manager::{ModelResourceManager, SystemMemoryProbe};
use crate::provider::create_provider;
use crate::render::{CommandRenderer, NullRenderer, Renderer};
use crate::storage::{FsRunStore, RunStore};

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative stop signal, checked between (model, task) units. The unit in
/// flight always finishes so the run directory never holds a half-written
/// pair.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug)]
pub struct RunReport {
    pub pairs_total: usize,
    pub pairs_completed: usize,
    pub pairs_failed: usize,
    pub cancelled: bool,
    pub summaries: Vec<TaskSummary>,
}

// =============================================================================
// Orchestrator
// =============================================================================

pub struct PipelineOrchestrator {
    config: BenchConfig,
    manager: ModelResourceManager,
    renderer: Box<dyn Renderer>,
    store: Box<dyn RunStore>,
    panel: JudgePanel,
    cancel: CancelFlag,
}

impl PipelineOrchestrator {
    pub fn new(
        config: BenchConfig,
        manager: ModelResourceManager,
        renderer: Box<dyn Renderer>,
        store: Box<dyn RunStore>,
        cancel: CancelFlag,
    ) -> Self {
        let panel = JudgePanel::new(config.resolved_judges(), config.evaluation.temperature);
        Self {
            config,
            manager,
            renderer,
            store,
            panel,
            cancel,
        }
    }

    /// Wire up the default collaborators from configuration alone.
    pub async fn from_config(config: BenchConfig, cancel: CancelFlag) -> Result<Self> {
        let provider = create_provider(&config.provider)?;
        let manager = ModelResourceManager::new(
            provider,
            config.models.clone(),
            config.max_concurrent_models,
            config.memory_threshold,
            Box::new(SystemMemoryProbe::new()),
        )
        .await?;

        let renderer: Box<dyn Renderer> = match &config.rendering.command {
            Some(command) => Box::new(CommandRenderer::new(command, config.rendering.timeout())),
            None => {
                if config.provider.kind == ProviderKind::Ollama {
                    warn!("no rendering command configured, iterations will be single-shot");
                }
                Box::new(NullRenderer)
            }
        };

        let store: Box<dyn RunStore> = Box::new(FsRunStore::create(&config.output_dir)?);
        Ok(Self::new(config, manager, renderer, store, cancel))
    }

    /// Execute the run. Cleanup runs regardless of the outcome and never
    /// masks it.
    pub async fn run(&mut self) -> Result<RunReport> {
        let result = self.run_inner().await;
        self.manager.shutdown().await;
        self.renderer.shutdown().await;
        info!("run finished, resources released");
        result
    }

    async fn run_inner(&mut self) -> Result<RunReport> {
        let models: Vec<String> = self.config.models.iter().map(|m| m.name.clone()).collect();
        let tasks = self.config.tasks.clone();
        let mode = self.config.mode;
        let total = models.len() * tasks.len();

        let mut report = RunReport {
            pairs_total: total,
            pairs_completed: 0,
            pairs_failed: 0,
            cancelled: false,
            summaries: Vec::new(),
        };

        let mut done = 0usize;
        'matrix: for model in &models {
            for task in &tasks {
                if self.cancel.is_cancelled() {
                    warn!("cancellation requested, stopping before the next pair");
                    report.cancelled = true;
                    break 'matrix;
                }
                done += 1;
                info!(progress = %format!("{done}/{total}"), model, task = %task.name, "running pair");

                match self.run_pair(model, task, mode).await {
                    Ok(summary) => {
                        report.pairs_completed += 1;
                        if let Some(summary) = summary {
                            report.summaries.push(summary);
                        }
                    }
                    Err(e) if e.is_fatal() => {
                        error!(error = %e, "fatal error, aborting run");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(model, task = %task.name, error = %e, "pair failed, continuing");
                        report.pairs_failed += 1;
                    }
                }
            }
        }

        if !report.summaries.is_empty() {
            let overview = benchmark_summary(&report.summaries);
            self.store.save_benchmark_summary(&overview).await?;
        }

        info!(
            completed = report.pairs_completed,
            failed = report.pairs_failed,
            "matrix done"
        );
        Ok(report)
    }

    async fn run_pair(
        &mut self,
        model: &str,
        task: &TaskConfig,
        mode: ExecutionMode,
    ) -> Result<Option<TaskSummary>> {
        let artifacts = match mode {
            ExecutionMode::EvaluationOnly => {
                let artifacts = self.store.load_artifacts(model, &task.name).await?;
                if artifacts.is_empty() {
                    return Err(BenchError::extraction(format!(
                        "no stored artifacts for {model}/{}",
                        task.name
                    )));
                }
                artifacts
            }
            _ => {
                let mut generation = GenerationLoop::new(
                    &mut self.manager,
                    self.renderer.as_ref(),
                    self.store.as_ref(),
                    self.config.iterations,
                );
                generation.run(model, task).await?
            }
        };

        if mode == ExecutionMode::GenerationOnly {
            return Ok(None);
        }

        let records = self.evaluate_artifacts(model, &task.name, &artifacts).await;
        let summary = summarize(&task.name, model, &records);
        if let Some(summary) = &summary {
            self.store.save_task_summary(summary).await?;
        } else {
            warn!(model, task = %task.name, "every judge failed, no summary for this pair");
        }
        Ok(summary)
    }

    async fn evaluate_artifacts(
        &mut self,
        model: &str,
        task: &str,
        artifacts: &[GenerationArtifact],
    ) -> Vec<EvaluationRecord> {
        let mut records = Vec::new();
        for artifact in artifacts {
            let batch = self
                .panel
                .evaluate_all(&mut self.manager, self.store.as_ref(), model, task, artifact)
                .await;
            records.extend(batch);
        }
        records
    }
}
