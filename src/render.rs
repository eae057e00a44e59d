//! Screenshot capture for generated artifacts.
//!
//! Rendering is a seam: the engine only needs "artifact in, image path out".
//! The default implementation shells out to a configured command (typically a
//! headless browser wrapper) with `{input}` and `{output}` placeholders.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::{BenchError, Result};
use crate::generation::ArtifactContent;
use crate::provider::ImageRef;

/// Captures a screenshot of an artifact. Failure is recoverable: the caller
/// keeps the artifact and stops iterating on it.
#[async_trait]
pub trait Renderer: Send + Sync {
    async fn render(&self, content: &ArtifactContent, output: &Path) -> Result<ImageRef>;

    /// Release any held resources (browser processes, temp dirs).
    async fn shutdown(&self) {}
}

/// Renderer used when no render command is configured. Always fails, which
/// degrades generation to single-shot and evaluation to code-only judging.
pub struct NullRenderer;

#[async_trait]
impl Renderer for NullRenderer {
    async fn render(&self, _content: &ArtifactContent, _output: &Path) -> Result<ImageRef> {
        Err(BenchError::rendering("no rendering command configured"))
    }
}

/// Shells out to an external screenshot command.
pub struct CommandRenderer {
    command: String,
    timeout: Duration,
}

impl CommandRenderer {
    pub fn new(command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            command: command.into(),
            timeout,
        }
    }

    /// Write the artifact to disk in the form the command expects: a lone
    /// file for documents, a directory tree rooted at `index.html` for
    /// projects.
    fn materialize(&self, content: &ArtifactContent, output: &Path) -> Result<PathBuf> {
        let dir = output
            .parent()
            .ok_or_else(|| BenchError::rendering("output path has no parent directory"))?;
        std::fs::create_dir_all(dir)?;

        match content {
            ArtifactContent::Document(html) => {
                let input = output.with_extension("input.html");
                std::fs::write(&input, html)?;
                Ok(input)
            }
            ArtifactContent::Project(files) => {
                let root = output.with_extension("input");
                for (rel, body) in files {
                    let path = root.join(rel);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&path, body)?;
                }
                let entry = root.join("index.html");
                if entry.is_file() {
                    Ok(entry)
                } else {
                    Ok(root)
                }
            }
        }
    }
}

#[async_trait]
impl Renderer for CommandRenderer {
    async fn render(&self, content: &ArtifactContent, output: &Path) -> Result<ImageRef> {
        let input = self.materialize(content, output)?;

        let rendered = self
            .command
            .replace("{input}", &input.to_string_lossy())
            .replace("{output}", &output.to_string_lossy());
        debug!(command = %rendered, "rendering artifact");

        let mut child = Command::new("sh")
            .arg("-c")
            .arg(&rendered)
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| BenchError::rendering(format!("cannot spawn render command: {e}")))?;

        let status = match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(result) => {
                result.map_err(|e| BenchError::rendering(format!("render command failed: {e}")))?
            }
            Err(_) => {
                warn!(timeout_secs = self.timeout.as_secs(), "render command timed out");
                let _ = child.kill().await;
                return Err(BenchError::rendering(format!(
                    "render command timed out after {}s",
                    self.timeout.as_secs()
                )));
            }
        };

        if !status.success() {
            return Err(BenchError::rendering(format!(
                "render command exited with {status}"
            )));
        }
        if !output.is_file() {
            return Err(BenchError::rendering(
                "render command produced no output file",
            ));
        }
        Ok(ImageRef::new(output))
    }
}
