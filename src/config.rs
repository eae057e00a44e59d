//! YAML-backed run configuration.
//!
//! The configuration supplies the model list with per-model overrides, the
//! task list, the iteration count, the judge list (with an `all` sentinel),
//! and the execution mode. Secrets come from the environment, never the file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{BenchError, Result};

/// The judge-list sentinel meaning "every configured model judges".
pub const ALL_JUDGES: &str = "all";

/// Which phases to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    GenerationOnly,
    EvaluationOnly,
    Full,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        Self::Full
    }
}

/// Backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Ollama,
    OpenRouter,
}

/// Provider connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub kind: ProviderKind,
    /// Host / base URL of the backend.
    #[serde(default = "default_host")]
    pub host: String,
    /// API key for remote backends. Usually left unset in the file and
    /// supplied via `OPENROUTER_API_KEY`.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    /// Client-level request timeout in seconds.
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "http://localhost:11434".to_string()
}

fn default_provider_timeout() -> u64 {
    300
}

impl ProviderConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Static per-model configuration. Immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub name: String,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    /// Context window size in tokens.
    #[serde(default = "default_num_ctx")]
    pub num_ctx: u32,
    /// Max output tokens (-1 for unlimited).
    #[serde(default = "default_num_predict")]
    pub num_predict: i32,
    /// Per-call timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub timeout_secs: u64,
    /// Consecutive-failure budget before the model is force-evicted.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

fn default_temperature() -> f32 {
    0.1
}
fn default_num_ctx() -> u32 {
    32_768
}
fn default_num_predict() -> i32 {
    -1
}
fn default_model_timeout() -> u64 {
    300
}
fn default_max_retries() -> u32 {
    3
}

impl ModelConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// What shape of artifact a task asks for.
///
/// In YAML this is either the bare keyword `document` or a map of the form
/// `project: {framework: react}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "TargetRepr", into = "TargetRepr")]
pub enum TaskTarget {
    /// A single self-contained HTML document.
    Document,
    /// A multi-file project for a named web framework.
    Project { framework: String },
}

impl Default for TaskTarget {
    fn default() -> Self {
        Self::Document
    }
}

/// Wire shape of [`TaskTarget`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TargetRepr {
    Keyword(String),
    Project { project: ProjectTarget },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ProjectTarget {
    framework: String,
}

impl TryFrom<TargetRepr> for TaskTarget {
    type Error = String;

    fn try_from(repr: TargetRepr) -> std::result::Result<Self, String> {
        match repr {
            TargetRepr::Keyword(word) if word == "document" => Ok(Self::Document),
            TargetRepr::Keyword(word) => Err(format!(
                "unknown target {word:?}, expected `document` or `project: {{framework}}`"
            )),
            TargetRepr::Project { project } => Ok(Self::Project {
                framework: project.framework,
            }),
        }
    }
}

impl From<TaskTarget> for TargetRepr {
    fn from(target: TaskTarget) -> Self {
        match target {
            TaskTarget::Document => Self::Keyword("document".to_string()),
            TaskTarget::Project { framework } => Self::Project {
                project: ProjectTarget { framework },
            },
        }
    }
}

/// One benchmark task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub name: String,
    pub description: String,
    pub prompt: String,
    #[serde(default)]
    pub target: TaskTarget,
}

/// Judge panel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationConfig {
    /// Models eligible as judges when the judge list says `all`.
    #[serde(default)]
    pub judge_models: Vec<String>,
    /// Temperature for judge calls.
    #[serde(default = "default_judge_temperature")]
    pub temperature: f32,
}

fn default_judge_temperature() -> f32 {
    0.1
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            judge_models: Vec::new(),
            temperature: default_judge_temperature(),
        }
    }
}

/// Rendering collaborator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderingConfig {
    /// External command rendering an artifact to a screenshot.
    /// `{input}` and `{output}` placeholders are substituted.
    #[serde(default)]
    pub command: Option<String>,
    /// Per-render timeout in seconds.
    #[serde(default = "default_render_timeout")]
    pub timeout_secs: u64,
}

fn default_render_timeout() -> u64 {
    60
}

impl Default for RenderingConfig {
    fn default() -> Self {
        Self {
            command: None,
            timeout_secs: default_render_timeout(),
        }
    }
}

impl RenderingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchConfig {
    pub provider: ProviderConfig,
    pub models: Vec<ModelConfig>,
    pub tasks: Vec<TaskConfig>,
    /// Generate/improve rounds per (model, task).
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Judge model names, or the single entry `all`.
    #[serde(default)]
    pub judges: Vec<String>,
    #[serde(default)]
    pub evaluation: EvaluationConfig,
    #[serde(default)]
    pub rendering: RenderingConfig,
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// System memory usage fraction above which all but the most recently
    /// used model are evicted before a new activation.
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,
    /// Active-model capacity.
    #[serde(default = "default_max_concurrent_models")]
    pub max_concurrent_models: usize,
}

fn default_iterations() -> u32 {
    3
}
fn default_output_dir() -> String {
    "results".to_string()
}
fn default_memory_threshold() -> f64 {
    0.8
}
fn default_max_concurrent_models() -> usize {
    1
}

impl BenchConfig {
    pub fn from_yaml(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BenchError::configuration(format!(
                "cannot read config {}: {e}",
                path.as_ref().display()
            ))
        })?;
        Self::from_yaml_str(&text)
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let mut config: BenchConfig = serde_yaml::from_str(text)
            .map_err(|e| BenchError::configuration(format!("invalid config: {e}")))?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Secrets and host overrides come from the environment.
    pub fn apply_env_overrides(&mut self) {
        if self.provider.api_key.is_none() {
            self.provider.api_key = std::env::var("OPENROUTER_API_KEY").ok();
        }
        if let Ok(host) = std::env::var("OLLAMA_HOST") {
            if self.provider.kind == ProviderKind::Ollama {
                self.provider.host = host;
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.models.is_empty() {
            return Err(BenchError::configuration("no models configured"));
        }
        if self.tasks.is_empty() {
            return Err(BenchError::configuration("no tasks configured"));
        }
        if self.iterations == 0 {
            return Err(BenchError::configuration("iterations must be >= 1"));
        }
        if !(0.0..=1.0).contains(&self.memory_threshold) {
            return Err(BenchError::configuration(
                "memory_threshold must be within [0, 1]",
            ));
        }
        if self.max_concurrent_models == 0 {
            return Err(BenchError::configuration(
                "max_concurrent_models must be >= 1",
            ));
        }

        let known: Vec<&str> = self.models.iter().map(|m| m.name.as_str()).collect();
        for judge in self.resolved_judges() {
            if !known.contains(&judge.as_str()) {
                return Err(BenchError::configuration(format!(
                    "judge {judge} is not a configured model"
                )));
            }
        }
        for task in &self.tasks {
            if task.prompt.trim().is_empty() {
                return Err(BenchError::configuration(format!(
                    "task {} has an empty prompt",
                    task.name
                )));
            }
        }
        Ok(())
    }

    /// Expand the `all` sentinel into the concrete judge list.
    pub fn resolved_judges(&self) -> Vec<String> {
        if self.judges.iter().any(|j| j == ALL_JUDGES) {
            if self.evaluation.judge_models.is_empty() {
                self.models.iter().map(|m| m.name.clone()).collect()
            } else {
                self.evaluation.judge_models.clone()
            }
        } else {
            self.judges.clone()
        }
    }

    pub fn model(&self, name: &str) -> Option<&ModelConfig> {
        self.models.iter().find(|m| m.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
provider:
  kind: ollama
models:
  - name: llava:13b
  - name: qwen2.5-coder:14b
    temperature: 0.3
tasks:
  - name: landing_page
    description: A product landing page
    prompt: Build a responsive landing page with a hero section.
iterations: 3
judges: [all]
"#;

    #[test]
    fn minimal_config_parses_with_defaults() {
        let config = BenchConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.models.len(), 2);
        assert_eq!(config.iterations, 3);
        assert_eq!(config.mode, ExecutionMode::Full);
        assert_eq!(config.max_concurrent_models, 1);
        assert_eq!(config.models[0].temperature, 0.1);
        assert_eq!(config.models[1].temperature, 0.3);
        assert_eq!(config.tasks[0].target, TaskTarget::Document);
    }

    #[test]
    fn all_sentinel_expands_to_every_model() {
        let config = BenchConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(
            config.resolved_judges(),
            vec!["llava:13b".to_string(), "qwen2.5-coder:14b".to_string()]
        );
    }

    #[test]
    fn unknown_judge_is_a_configuration_error() {
        let text = MINIMAL.replace("[all]", "[nonexistent-model]");
        let err = BenchConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(err, BenchError::Configuration(_)));
    }

    #[test]
    fn zero_iterations_rejected() {
        let text = MINIMAL.replace("iterations: 3", "iterations: 0");
        assert!(BenchConfig::from_yaml_str(&text).is_err());
    }

    #[test]
    fn project_target_parses() {
        let text = MINIMAL.replace(
            "prompt: Build a responsive landing page with a hero section.",
            "prompt: Build a dashboard.\n    target:\n      project:\n        framework: react",
        );
        let config = BenchConfig::from_yaml_str(&text).unwrap();
        assert_eq!(
            config.tasks[0].target,
            TaskTarget::Project {
                framework: "react".to_string()
            }
        );
    }

    #[test]
    fn document_target_keyword_parses() {
        let text = MINIMAL.replace(
            "prompt: Build a responsive landing page with a hero section.",
            "prompt: Build a landing page.\n    target: document",
        );
        let config = BenchConfig::from_yaml_str(&text).unwrap();
        assert_eq!(config.tasks[0].target, TaskTarget::Document);
    }

    #[test]
    fn unknown_target_keyword_rejected() {
        let text = MINIMAL.replace(
            "prompt: Build a responsive landing page with a hero section.",
            "prompt: Build a landing page.\n    target: widget",
        );
        let err = BenchConfig::from_yaml_str(&text).unwrap_err();
        assert!(matches!(err, BenchError::Configuration(_)));
    }

    #[test]
    fn target_round_trips_through_yaml() {
        let target = TaskTarget::Project {
            framework: "vue".to_string(),
        };
        let yaml = serde_yaml::to_string(&target).unwrap();
        assert!(yaml.contains("project"));
        assert_eq!(serde_yaml::from_str::<TaskTarget>(&yaml).unwrap(), target);
    }
}
