#![forbid(unsafe_code)]

//! # pixelbench
//!
//! A benchmark engine for generative UI models.
//!
//! Models produce a web interface for each task, then iteratively improve it
//! while looking at screenshots of what their previous attempt actually
//! renders like. A blind panel of judge models scores every iteration on a
//! fixed five-criterion rubric, and the engine aggregates the verdicts into
//! per-task and whole-run statistics: score progression, judge agreement,
//! recurring strengths and weaknesses.
//!
//! The crate is organized around seams: [`provider::ModelProvider`] hides the
//! backend (Ollama or OpenRouter), [`render::Renderer`] hides screenshot
//! capture, and [`storage::RunStore`] hides the persisted layout, so each can
//! be swapped in tests.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod extract;
pub mod generation;
pub mod judge;
pub mod manager;
pub mod pipeline;
pub mod provider;
pub mod render;
pub mod session;
pub mod storage;

pub use aggregate::{benchmark_summary, summarize, BenchmarkSummary, TaskSummary};
pub use config::{BenchConfig, ExecutionMode, ModelConfig, ProviderKind, TaskConfig, TaskTarget};
pub use error::{BenchError, Result};
pub use generation::{ArtifactContent, GenerationArtifact, GenerationLoop};
pub use judge::{Criterion, CriterionScores, EvaluationRecord, JudgePanel};
pub use manager::{Call, MemoryProbe, ModelResourceManager, ModelStats, SystemMemoryProbe};
pub use pipeline::{CancelFlag, PipelineOrchestrator, RunReport};
pub use provider::{create_provider, GenerateRequest, GenerateResponse, ModelProvider, ProviderError};
pub use render::{CommandRenderer, NullRenderer, Renderer};
pub use session::ConversationSession;
pub use storage::{FsRunStore, RunStore};
