//! Iterative generate-render-improve loop.
//!
//! Round 1 sends the task prompt cold. Every later round shows the model a
//! screenshot of its previous output and asks for an improved version, so the
//! model critiques what its code actually looks like rather than what it
//! remembers writing. When a later round yields no extractable artifact the
//! previous artifact is carried forward unchanged; when rendering fails the
//! loop stops early, because further rounds would have nothing to look at.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::{TaskConfig, TaskTarget};
use crate::error::{BenchError, Result};
use crate::extract::{
    extract_document, extract_project_files, validate_document, validate_project, ValidationReport,
};
use crate::manager::{Call, ModelResourceManager};
use crate::provider::ImageRef;
use crate::render::Renderer;
use crate::session::ConversationSession;
use crate::storage::RunStore;

// =============================================================================
// Artifacts
// =============================================================================

/// The extracted payload of one generation round.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactContent {
    Document(String),
    Project(BTreeMap<String, String>),
}

impl Default for ArtifactContent {
    fn default() -> Self {
        Self::Document(String::new())
    }
}

impl ArtifactContent {
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Document(html) => html.trim().is_empty(),
            Self::Project(files) => files.is_empty(),
        }
    }
}

/// One round's output, as stored and as judged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationArtifact {
    /// 1-based round number.
    pub iteration: u32,
    /// Full model response, kept for audit.
    pub raw_response: String,
    /// Extracted content. Persisted as files, not in metadata.
    #[serde(skip)]
    pub content: ArtifactContent,
    pub validation: Option<ValidationReport>,
    #[serde(with = "duration_ms")]
    pub duration: Duration,
    pub screenshot: Option<ImageRef>,
    /// True when this round produced nothing extractable and the previous
    /// round's content was carried forward.
    pub extraction_fallback: bool,
}

mod duration_ms {
    use super::Duration;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

// =============================================================================
// Prompts
// =============================================================================

fn initial_prompt(task: &TaskConfig) -> String {
    match &task.target {
        TaskTarget::Document => format!(
            "{}\n\n\
             Respond with one complete, self-contained HTML document. Inline all \
             CSS and JavaScript. Put the document in a single ```html code block.",
            task.prompt
        ),
        TaskTarget::Project { framework } => format!(
            "{}\n\n\
             Build this as a {framework} project. Respond with every file in its \
             own fenced code block labeled with its path, like:\n\
             ```filename: src/App.jsx\n...\n```\n\
             Include an index.html entry point.",
            task.prompt
        ),
    }
}

fn improvement_prompt(task: &TaskConfig, iteration: u32) -> String {
    format!(
        "This is iteration {iteration} of an iterative improvement process.\n\n\
         Original task: {}\n\n\
         The attached screenshot shows how your previous version renders in a \
         browser. Study it and improve the result, focusing on:\n\
         - visual issues you can see in the screenshot\n\
         - responsiveness across viewport sizes\n\
         - user experience and interactivity\n\
         - code quality\n\
         - anything the task asks for that is still missing\n\n\
         Respond in the same format as before, with the full content, not a diff.",
        task.description
    )
}

// =============================================================================
// Loop
// =============================================================================

pub struct GenerationLoop<'a> {
    manager: &'a mut ModelResourceManager,
    renderer: &'a dyn Renderer,
    store: &'a dyn RunStore,
    iterations: u32,
}

impl<'a> GenerationLoop<'a> {
    pub fn new(
        manager: &'a mut ModelResourceManager,
        renderer: &'a dyn Renderer,
        store: &'a dyn RunStore,
        iterations: u32,
    ) -> Self {
        Self {
            manager,
            renderer,
            store,
            iterations,
        }
    }

    /// Run the full loop for one (model, task) pair.
    ///
    /// Returns the artifacts in round order. The vector is shorter than the
    /// configured iteration count only when rendering failed mid-run.
    pub async fn run(&mut self, model: &str, task: &TaskConfig) -> Result<Vec<GenerationArtifact>> {
        let mut session = ConversationSession::new();
        self.manager.clear_history(model).await;

        let dir = self.store.artifact_dir(model, &task.name)?;
        let mut artifacts: Vec<GenerationArtifact> = Vec::new();

        for iteration in 1..=self.iterations {
            info!(model, task = %task.name, iteration, "generation round");

            let (prompt, image) = if iteration == 1 {
                (initial_prompt(task), None)
            } else {
                let previous_shot = artifacts.last().and_then(|a| a.screenshot.clone());
                (improvement_prompt(task, iteration), previous_shot)
            };

            let mut call = Call::new(&prompt).history(session.snapshot().to_vec());
            if let Some(img) = &image {
                call = call.image(img.clone());
            }

            let response = self.manager.invoke(model, call).await?;
            session.append_user_turn(&prompt, image);
            session.append_assistant_turn(&response.content);

            let (content, fallback) = match self.extract(task, &response.content) {
                Some(content) => (content, false),
                None if iteration == 1 => {
                    return Err(BenchError::extraction(format!(
                        "no artifact in first response for task {}",
                        task.name
                    )));
                }
                None => {
                    warn!(model, iteration, "nothing extractable, carrying previous version");
                    let previous = artifacts
                        .last()
                        .map(|a| a.content.clone())
                        .unwrap_or_default();
                    (previous, true)
                }
            };

            let validation = match &content {
                ArtifactContent::Document(html) => Some(validate_document(html)),
                ArtifactContent::Project(files) => Some(validate_project(files)),
            };

            let shot_path = dir.join(format!("v{iteration}.png"));
            let screenshot = match self.renderer.render(&content, &shot_path).await {
                Ok(image) => Some(image),
                Err(e) => {
                    warn!(model, iteration, error = %e, "rendering failed, stopping early");
                    None
                }
            };
            let render_failed = screenshot.is_none();

            let artifact = GenerationArtifact {
                iteration,
                raw_response: response.content,
                content,
                validation,
                duration: response.duration,
                screenshot,
                extraction_fallback: fallback,
            };
            self.store.save_artifact(model, &task.name, &artifact).await?;
            artifacts.push(artifact);

            if render_failed {
                break;
            }
        }

        Ok(artifacts)
    }

    fn extract(&self, task: &TaskConfig, response: &str) -> Option<ArtifactContent> {
        match &task.target {
            TaskTarget::Document => extract_document(response).map(ArtifactContent::Document),
            TaskTarget::Project { .. } => {
                let files = extract_project_files(response);
                if files.is_empty() {
                    None
                } else {
                    Some(ArtifactContent::Project(files))
                }
            }
        }
    }
}
