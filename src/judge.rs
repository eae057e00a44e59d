//! Blind multi-judge evaluation.
//!
//! Judges see the artifact's code and its screenshot, never the task name or
//! the generating model's identity. Every judge applies the same fixed
//! five-criterion rubric and must answer in JSON; a response that does not
//! parse into the rubric shape is a failed evaluation, not a zero score.

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{BenchError, Result};
use crate::generation::{ArtifactContent, GenerationArtifact};
use crate::manager::{Call, ModelResourceManager};
use crate::provider::CallOverrides;
use crate::storage::RunStore;

// =============================================================================
// Rubric
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Criterion {
    VisualAppeal,
    Functionality,
    Responsiveness,
    CodeQuality,
    TaskCompletion,
}

impl Criterion {
    pub const ALL: [Criterion; 5] = [
        Criterion::VisualAppeal,
        Criterion::Functionality,
        Criterion::Responsiveness,
        Criterion::CodeQuality,
        Criterion::TaskCompletion,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Criterion::VisualAppeal => "visual_appeal",
            Criterion::Functionality => "functionality",
            Criterion::Responsiveness => "responsiveness",
            Criterion::CodeQuality => "code_quality",
            Criterion::TaskCompletion => "task_completion",
        }
    }
}

/// Scores on the fixed rubric, each in [0, 10].
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CriterionScores {
    pub visual_appeal: f64,
    pub functionality: f64,
    pub responsiveness: f64,
    pub code_quality: f64,
    pub task_completion: f64,
}

impl CriterionScores {
    pub fn get(&self, criterion: Criterion) -> f64 {
        match criterion {
            Criterion::VisualAppeal => self.visual_appeal,
            Criterion::Functionality => self.functionality,
            Criterion::Responsiveness => self.responsiveness,
            Criterion::CodeQuality => self.code_quality,
            Criterion::TaskCompletion => self.task_completion,
        }
    }

    pub fn mean(&self) -> f64 {
        (self.visual_appeal
            + self.functionality
            + self.responsiveness
            + self.code_quality
            + self.task_completion)
            / 5.0
    }

    fn clamped(self) -> Self {
        let clamp = |v: f64| v.clamp(0.0, 10.0);
        Self {
            visual_appeal: clamp(self.visual_appeal),
            functionality: clamp(self.functionality),
            responsiveness: clamp(self.responsiveness),
            code_quality: clamp(self.code_quality),
            task_completion: clamp(self.task_completion),
        }
    }
}

/// One judge's verdict on one iteration's artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub judge: String,
    pub iteration: u32,
    pub scores: CriterionScores,
    pub overall: f64,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
}

// =============================================================================
// Prompt
// =============================================================================

const JUDGE_SYSTEM: &str = "You are an expert web developer and UI/UX designer \
evaluating generated web interfaces. Be strict, consistent, and specific. \
Answer only with the requested JSON object.";

fn judge_prompt(content: &ArtifactContent, has_screenshot: bool) -> String {
    let code = match content {
        ArtifactContent::Document(html) => format!("```html\n{html}\n```"),
        ArtifactContent::Project(files) => {
            let mut out = String::new();
            for (path, body) in files {
                out.push_str(&format!("```filename: {path}\n{body}\n```\n"));
            }
            out
        }
    };
    let screenshot_note = if has_screenshot {
        "A screenshot of the rendered result is attached. Weigh what you see \
         at least as heavily as the code."
    } else {
        "No screenshot is available. Judge rendering-dependent criteria from \
         the code alone."
    };

    format!(
        "Evaluate this web interface.\n\n{screenshot_note}\n\n{code}\n\n\
         Score each criterion from 0 to 10:\n\
         - visual_appeal: layout, typography, color, polish\n\
         - functionality: interactive elements work as implied\n\
         - responsiveness: adapts sensibly across viewport sizes\n\
         - code_quality: structure, semantics, maintainability\n\
         - task_completion: the interface is complete and coherent\n\n\
         Respond with exactly this JSON object:\n\
         {{\n\
           \"visual_appeal\": <number>,\n\
           \"functionality\": <number>,\n\
           \"responsiveness\": <number>,\n\
           \"code_quality\": <number>,\n\
           \"task_completion\": <number>,\n\
           \"overall_score\": <number>,\n\
           \"strengths\": [\"...\"],\n\
           \"weaknesses\": [\"...\"],\n\
           \"improvement_suggestions\": [\"...\"]\n\
         }}"
    )
}

/// Wire shape of a judge reply. The five criteria are mandatory; the rest
/// default so a terse judge still produces a usable record.
#[derive(Debug, Deserialize)]
struct JudgeReply {
    visual_appeal: f64,
    functionality: f64,
    responsiveness: f64,
    code_quality: f64,
    task_completion: f64,
    #[serde(default)]
    overall_score: Option<f64>,
    #[serde(default)]
    strengths: Vec<String>,
    #[serde(default)]
    weaknesses: Vec<String>,
    #[serde(default)]
    improvement_suggestions: Vec<String>,
}

impl JudgeReply {
    fn into_record(self, judge: &str, iteration: u32) -> EvaluationRecord {
        let scores = CriterionScores {
            visual_appeal: self.visual_appeal,
            functionality: self.functionality,
            responsiveness: self.responsiveness,
            code_quality: self.code_quality,
            task_completion: self.task_completion,
        }
        .clamped();
        // Judges routinely omit or zero the overall; fall back to the mean.
        let overall = match self.overall_score {
            Some(v) if v > 0.0 => v.clamp(0.0, 10.0),
            _ => scores.mean(),
        };
        EvaluationRecord {
            judge: judge.to_string(),
            iteration,
            scores,
            overall,
            strengths: self.strengths,
            weaknesses: self.weaknesses,
            suggestions: self.improvement_suggestions,
        }
    }
}

// =============================================================================
// Panel
// =============================================================================

pub struct JudgePanel {
    judges: Vec<String>,
    temperature: f32,
}

impl JudgePanel {
    pub fn new(judges: Vec<String>, temperature: f32) -> Self {
        Self { judges, temperature }
    }

    pub fn judges(&self) -> &[String] {
        &self.judges
    }

    /// One judge scores one artifact.
    pub async fn evaluate(
        &self,
        manager: &mut ModelResourceManager,
        judge: &str,
        artifact: &GenerationArtifact,
    ) -> Result<EvaluationRecord> {
        let prompt = judge_prompt(&artifact.content, artifact.screenshot.is_some());

        let mut call = Call::new(prompt).system(JUDGE_SYSTEM).overrides(CallOverrides {
            temperature: Some(self.temperature),
            ..Default::default()
        });
        if let Some(shot) = &artifact.screenshot {
            call = call.image(shot.clone());
        }

        let response = manager
            .invoke_structured(judge, call)
            .await
            .map_err(|e| BenchError::evaluation(judge, artifact.iteration, e.to_string()))?;

        let payload = crate::provider::strip_json_fence(&response.content);
        let reply: JudgeReply = serde_json::from_str(payload).map_err(|e| {
            BenchError::evaluation(
                judge,
                artifact.iteration,
                format!("reply does not match the rubric: {e}"),
            )
        })?;

        Ok(reply.into_record(judge, artifact.iteration))
    }

    /// The whole panel scores one artifact. A failed judge is logged and
    /// skipped so one refusal never voids the other verdicts. Successful
    /// records are persisted as they arrive.
    pub async fn evaluate_all(
        &self,
        manager: &mut ModelResourceManager,
        store: &dyn RunStore,
        model: &str,
        task: &str,
        artifact: &GenerationArtifact,
    ) -> Vec<EvaluationRecord> {
        let mut records = Vec::new();
        for judge in &self.judges {
            info!(judge, iteration = artifact.iteration, "judging artifact");
            match self.evaluate(manager, judge, artifact).await {
                Ok(record) => {
                    if let Err(e) = store.save_evaluation(model, task, &record).await {
                        warn!(judge, error = %e, "failed to persist evaluation");
                    }
                    records.push(record);
                }
                Err(e) => {
                    warn!(judge, iteration = artifact.iteration, error = %e, "judge failed");
                }
            }
        }
        records
    }
}
