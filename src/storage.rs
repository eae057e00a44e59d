//! Persisted run layout.
//!
//! One run maps to one timestamped directory:
//!
//! ```text
//! results/20240101_120000/
//!   llava_13b/
//!     landing_page/
//!       v1.html            (or v1/ file tree for project tasks)
//!       v1.png
//!       v1_metadata.json
//!       v1_result_llava_13b.json
//!     landing_page_summary.json
//!   benchmark_summary.json
//! ```
//!
//! Artifact content is stored as real files so results can be opened in a
//! browser directly; metadata JSON deliberately excludes it.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Local;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::aggregate::{BenchmarkSummary, TaskSummary};
use crate::error::Result;
use crate::generation::{ArtifactContent, GenerationArtifact};
use crate::judge::EvaluationRecord;

/// Persistence seam for everything a run produces.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Directory artifacts of this (model, task) pair live in, created on
    /// first use. Screenshots are written here by the caller.
    fn artifact_dir(&self, model: &str, task: &str) -> Result<PathBuf>;

    async fn save_artifact(
        &self,
        model: &str,
        task: &str,
        artifact: &GenerationArtifact,
    ) -> Result<()>;

    async fn save_evaluation(
        &self,
        model: &str,
        task: &str,
        record: &EvaluationRecord,
    ) -> Result<()>;

    async fn save_task_summary(&self, summary: &TaskSummary) -> Result<()>;

    async fn save_benchmark_summary(&self, summary: &BenchmarkSummary) -> Result<()>;

    /// Re-read previously generated artifacts, for evaluation-only runs.
    async fn load_artifacts(&self, model: &str, task: &str) -> Result<Vec<GenerationArtifact>>;
}

/// Model and judge names contain `/` and `:` (registry paths, tag suffixes)
/// which do not survive as path components.
fn sanitize(name: &str) -> String {
    name.replace(['/', ':', '\\'], "_")
}

// =============================================================================
// Filesystem store
// =============================================================================

pub struct FsRunStore {
    root: PathBuf,
}

impl FsRunStore {
    /// Open a fresh timestamped run directory under `output_dir`.
    pub fn create(output_dir: impl AsRef<Path>) -> Result<Self> {
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let root = output_dir.as_ref().join(stamp);
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Open an existing run directory, for evaluation-only runs.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn pair_dir(&self, model: &str, task: &str) -> PathBuf {
        self.root.join(sanitize(model)).join(sanitize(task))
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, json)?;
        debug!(path = %path.display(), "wrote json");
        Ok(())
    }

    fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e).into())
    }

    fn write_content(dir: &Path, iteration: u32, content: &ArtifactContent) -> Result<()> {
        match content {
            ArtifactContent::Document(html) => {
                std::fs::write(dir.join(format!("v{iteration}.html")), html)?;
            }
            ArtifactContent::Project(files) => {
                let root = dir.join(format!("v{iteration}"));
                for (rel, body) in files {
                    let path = root.join(rel);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(path, body)?;
                }
            }
        }
        Ok(())
    }

    fn read_content(dir: &Path, iteration: u32) -> Result<Option<ArtifactContent>> {
        let doc = dir.join(format!("v{iteration}.html"));
        if doc.is_file() {
            return Ok(Some(ArtifactContent::Document(std::fs::read_to_string(
                doc,
            )?)));
        }
        let tree = dir.join(format!("v{iteration}"));
        if tree.is_dir() {
            let mut files = std::collections::BTreeMap::new();
            read_tree(&tree, &tree, &mut files)?;
            return Ok(Some(ArtifactContent::Project(files)));
        }
        Ok(None)
    }
}

fn read_tree(
    root: &Path,
    dir: &Path,
    files: &mut std::collections::BTreeMap<String, String>,
) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            read_tree(root, &path, files)?;
        } else if let Ok(rel) = path.strip_prefix(root) {
            files.insert(
                rel.to_string_lossy().replace('\\', "/"),
                std::fs::read_to_string(&path)?,
            );
        }
    }
    Ok(())
}

#[async_trait]
impl RunStore for FsRunStore {
    fn artifact_dir(&self, model: &str, task: &str) -> Result<PathBuf> {
        let dir = self.pair_dir(model, task);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    async fn save_artifact(
        &self,
        model: &str,
        task: &str,
        artifact: &GenerationArtifact,
    ) -> Result<()> {
        let dir = self.artifact_dir(model, task)?;
        Self::write_content(&dir, artifact.iteration, &artifact.content)?;
        self.write_json(
            &dir.join(format!("v{}_metadata.json", artifact.iteration)),
            artifact,
        )
    }

    async fn save_evaluation(
        &self,
        model: &str,
        task: &str,
        record: &EvaluationRecord,
    ) -> Result<()> {
        let dir = self.artifact_dir(model, task)?;
        let file = format!("v{}_result_{}.json", record.iteration, sanitize(&record.judge));
        self.write_json(&dir.join(file), record)
    }

    async fn save_task_summary(&self, summary: &TaskSummary) -> Result<()> {
        let dir = self.root.join(sanitize(&summary.model));
        std::fs::create_dir_all(&dir)?;
        let file = format!("{}_summary.json", sanitize(&summary.task));
        self.write_json(&dir.join(file), summary)
    }

    async fn save_benchmark_summary(&self, summary: &BenchmarkSummary) -> Result<()> {
        self.write_json(&self.root.join("benchmark_summary.json"), summary)
    }

    async fn load_artifacts(&self, model: &str, task: &str) -> Result<Vec<GenerationArtifact>> {
        let dir = self.pair_dir(model, task);
        let mut artifacts = Vec::new();
        if !dir.is_dir() {
            return Ok(artifacts);
        }
        for iteration in 1u32.. {
            let meta = dir.join(format!("v{iteration}_metadata.json"));
            if !meta.is_file() {
                break;
            }
            let mut artifact: GenerationArtifact = Self::read_json(&meta)?;
            if let Some(content) = Self::read_content(&dir, iteration)? {
                artifact.content = content;
            }
            // A recorded screenshot may have been deleted since the run.
            if let Some(shot) = &artifact.screenshot {
                if !shot.path().is_file() {
                    artifact.screenshot = None;
                }
            }
            artifacts.push(artifact);
        }
        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn artifact(iteration: u32, html: &str) -> GenerationArtifact {
        GenerationArtifact {
            iteration,
            raw_response: format!("round {iteration}"),
            content: ArtifactContent::Document(html.to_string()),
            validation: None,
            duration: Duration::from_millis(10),
            screenshot: None,
            extraction_fallback: false,
        }
    }

    #[tokio::test]
    async fn artifacts_round_trip_through_the_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::create(dir.path()).unwrap();

        store
            .save_artifact("llava:13b", "landing", &artifact(1, "<html>v1</html>"))
            .await
            .unwrap();
        store
            .save_artifact("llava:13b", "landing", &artifact(2, "<html>v2</html>"))
            .await
            .unwrap();

        let loaded = store.load_artifacts("llava:13b", "landing").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[1].iteration, 2);
        match &loaded[1].content {
            ArtifactContent::Document(html) => assert_eq!(html, "<html>v2</html>"),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn model_names_with_separators_become_safe_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::create(dir.path()).unwrap();
        let path = store.artifact_dir("meta/llama:8b", "landing").unwrap();
        assert!(path.ends_with("meta_llama_8b/landing"));
        assert!(path.is_dir());
    }

    #[tokio::test]
    async fn project_trees_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::create(dir.path()).unwrap();

        let mut files = std::collections::BTreeMap::new();
        files.insert("index.html".to_string(), "<html></html>".to_string());
        files.insert("src/app.js".to_string(), "export {}".to_string());
        let mut a = artifact(1, "");
        a.content = ArtifactContent::Project(files.clone());

        store.save_artifact("m", "dashboard", &a).await.unwrap();
        let loaded = store.load_artifacts("m", "dashboard").await.unwrap();
        match &loaded[0].content {
            ArtifactContent::Project(got) => assert_eq!(got, &files),
            other => panic!("unexpected content: {other:?}"),
        }
    }

    #[tokio::test]
    async fn missing_pair_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsRunStore::create(dir.path()).unwrap();
        assert!(store.load_artifacts("m", "t").await.unwrap().is_empty());
    }
}
