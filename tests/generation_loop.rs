mod common;

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use common::{manager_with, MockProvider};
use pixelbench::config::{TaskConfig, TaskTarget};
use pixelbench::error::BenchError;
use pixelbench::generation::{ArtifactContent, GenerationLoop};
use pixelbench::provider::ImageRef;
use pixelbench::render::Renderer;
use pixelbench::storage::{FsRunStore, RunStore};

/// Renderer that "captures" by touching the output file, optionally failing
/// from a given call onward.
struct TouchRenderer {
    calls: AtomicU32,
    fail_from_call: Option<u32>,
}

impl TouchRenderer {
    fn ok() -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_from_call: None,
        }
    }

    fn failing_from(call: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            fail_from_call: Some(call),
        }
    }
}

#[async_trait]
impl Renderer for TouchRenderer {
    async fn render(
        &self,
        _content: &ArtifactContent,
        output: &Path,
    ) -> pixelbench::Result<ImageRef> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fail_from) = self.fail_from_call {
            if call >= fail_from {
                return Err(BenchError::rendering("scripted render failure"));
            }
        }
        std::fs::write(output, b"png")?;
        Ok(ImageRef::new(output))
    }
}

fn task() -> TaskConfig {
    TaskConfig {
        name: "landing".to_string(),
        description: "A landing page".to_string(),
        prompt: "Build a landing page.".to_string(),
        target: TaskTarget::Document,
    }
}

fn doc(n: u32) -> String {
    format!("<!DOCTYPE html><html><body>version {n}</body></html>")
}

#[tokio::test]
async fn three_rounds_yield_three_grounded_artifacts() {
    let provider = Arc::new(
        MockProvider::new()
            .reply("warm")
            .reply(doc(1))
            .reply(doc(2))
            .reply(doc(3)),
    );
    let mut manager = manager_with(provider.clone(), &["m"], 1, 0.1).await;
    let renderer = TouchRenderer::ok();
    let dir = tempfile::tempdir().unwrap();
    let store = FsRunStore::create(dir.path()).unwrap();

    let mut generation = GenerationLoop::new(&mut manager, &renderer, &store, 3);
    let artifacts = generation.run("m", &task()).await.unwrap();

    assert_eq!(artifacts.len(), 3);
    assert_eq!(
        artifacts.iter().map(|a| a.iteration).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(artifacts.iter().all(|a| a.screenshot.is_some()));
    assert!(artifacts.iter().all(|a| !a.extraction_fallback));

    // Request order: warm-up, then three prompts. Improvement rounds carry
    // the conversation and the previous round's screenshot.
    let requests = provider.requests.lock().unwrap();
    assert_eq!(requests.len(), 4);
    assert!(requests[1].history.is_empty());
    assert!(requests[1].image.is_none());
    assert_eq!(requests[2].history.len(), 2);
    assert!(requests[2].image.is_some());
    assert!(requests[2].prompt.contains("iteration 2"));
    assert_eq!(requests[3].history.len(), 4);

    // Artifacts were persisted round by round.
    let stored = store.load_artifacts("m", "landing").await.unwrap();
    assert_eq!(stored.len(), 3);
}

#[tokio::test]
async fn unparseable_later_round_carries_the_previous_artifact() {
    let provider = Arc::new(
        MockProvider::new()
            .reply("warm")
            .reply(doc(1))
            .reply("Sorry, I will describe the changes instead of writing code."),
    );
    let mut manager = manager_with(provider, &["m"], 1, 0.1).await;
    let renderer = TouchRenderer::ok();
    let dir = tempfile::tempdir().unwrap();
    let store = FsRunStore::create(dir.path()).unwrap();

    let mut generation = GenerationLoop::new(&mut manager, &renderer, &store, 2);
    let artifacts = generation.run("m", &task()).await.unwrap();

    assert_eq!(artifacts.len(), 2);
    assert!(artifacts[1].extraction_fallback);
    match (&artifacts[0].content, &artifacts[1].content) {
        (ArtifactContent::Document(a), ArtifactContent::Document(b)) => assert_eq!(a, b),
        other => panic!("unexpected contents: {other:?}"),
    }
}

#[tokio::test]
async fn unparseable_first_round_fails_the_pair() {
    let provider = Arc::new(MockProvider::new().reply("warm").reply("no markup here"));
    let mut manager = manager_with(provider, &["m"], 1, 0.1).await;
    let renderer = TouchRenderer::ok();
    let dir = tempfile::tempdir().unwrap();
    let store = FsRunStore::create(dir.path()).unwrap();

    let mut generation = GenerationLoop::new(&mut manager, &renderer, &store, 3);
    let err = generation.run("m", &task()).await.unwrap_err();
    assert!(matches!(err, BenchError::Extraction(_)));
}

#[tokio::test]
async fn render_failure_stops_the_loop_early() {
    let provider = Arc::new(
        MockProvider::new()
            .reply("warm")
            .reply(doc(1))
            .reply(doc(2)),
    );
    let mut manager = manager_with(provider, &["m"], 1, 0.1).await;
    let renderer = TouchRenderer::failing_from(2);
    let dir = tempfile::tempdir().unwrap();
    let store = FsRunStore::create(dir.path()).unwrap();

    let mut generation = GenerationLoop::new(&mut manager, &renderer, &store, 3);
    let artifacts = generation.run("m", &task()).await.unwrap();

    // Round 2's artifact is kept without a screenshot; round 3 never runs.
    assert_eq!(artifacts.len(), 2);
    assert!(artifacts[0].screenshot.is_some());
    assert!(artifacts[1].screenshot.is_none());
}

#[tokio::test]
async fn project_tasks_collect_labeled_files() {
    let response = "\
```filename: index.html
<html></html>
```
```filename: src/app.js
export default 1;
```";
    let provider = Arc::new(MockProvider::new().reply("warm").reply(response));
    let mut manager = manager_with(provider, &["m"], 1, 0.1).await;
    let renderer = TouchRenderer::ok();
    let dir = tempfile::tempdir().unwrap();
    let store = FsRunStore::create(dir.path()).unwrap();

    let mut project_task = task();
    project_task.target = TaskTarget::Project {
        framework: "react".to_string(),
    };

    let mut generation = GenerationLoop::new(&mut manager, &renderer, &store, 1);
    let artifacts = generation.run("m", &project_task).await.unwrap();

    match &artifacts[0].content {
        ArtifactContent::Project(files) => {
            assert_eq!(files.len(), 2);
            assert!(files.contains_key("src/app.js"));
        }
        other => panic!("unexpected content: {other:?}"),
    }
}
