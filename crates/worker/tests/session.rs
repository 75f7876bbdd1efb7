//! End-to-end tests for the worker session helpers.
//!
//! A coordinator runs on top of a `CanvasDocument` with a scripted client;
//! server messages are applied directly while `session::generate` waits.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use easel_comfyui::{
    Client, ClientMessage, ComfyWorkflow, Connection, MessageStream, TransportError,
    WorkflowSettings,
};
use easel_core::{Bounds, Extent, Image, ImageCollection};
use easel_generation::{Document, GenerationCoordinator, JobState};
use easel_worker::{session, CanvasDocument, WorkerError};

struct FixedIdClient;

#[async_trait]
impl Client for FixedIdClient {
    async fn enqueue(&self, _workflow: &ComfyWorkflow) -> Result<String, TransportError> {
        Ok("p1".to_string())
    }

    async fn interrupt(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn listen(&self) -> Result<MessageStream, TransportError> {
        Err(TransportError::Disconnected)
    }
}

fn setup(output: &std::path::Path) -> (Arc<CanvasDocument>, Arc<GenerationCoordinator>) {
    let document = Arc::new(CanvasDocument::new(
        Image::blank(Extent::new(64, 64)),
        None,
        output,
    ));
    let connection = Connection::new();
    connection.attach(Arc::new(FixedIdClient));
    let as_document: Arc<dyn Document> = document.clone();
    let coordinator = GenerationCoordinator::new(
        as_document,
        Arc::new(connection),
        Arc::new(WorkflowSettings::default()),
    );
    (document, coordinator)
}

fn scratch_dir() -> std::path::PathBuf {
    std::env::temp_dir().join(format!("easel-worker-{}", uuid::Uuid::new_v4()))
}

async fn wait_for_job(coordinator: &GenerationCoordinator, id: &str) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !coordinator.has_job(id) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("job was never queued");
}

// ---------------------------------------------------------------------------
// Test: a prompt runs to completion and its results are written as PNGs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prompt_results_are_written() {
    let output = scratch_dir();
    let (document, coordinator) = setup(&output);

    let waiting = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { session::generate(&coordinator, "a misty forest").await }
    });

    wait_for_job(&coordinator, "p1").await;
    coordinator
        .handle_message(ClientMessage::progress("p1", 0.5))
        .unwrap();
    let results: ImageCollection = (0..2).map(|_| Image::blank(Extent::new(64, 64))).collect();
    coordinator
        .handle_message(ClientMessage::finished("p1", results))
        .unwrap();

    let job = waiting.await.unwrap().unwrap();
    assert_eq!(job.state(), JobState::Finished);
    assert_eq!(job.prompt(), "a misty forest");

    let written = session::apply_results(&coordinator, &document, &job).unwrap();
    assert_eq!(written.len(), 2);
    for path in &written {
        assert!(path.exists());
        let name = path.file_name().unwrap().to_string_lossy();
        assert!(name.ends_with("generated-a-misty-forest.png"), "{name}");
    }

    let layers = document.layers();
    assert_eq!(layers.len(), 2);
    assert!(layers.iter().all(|layer| layer.bounds() == Bounds::new(0, 0, 64, 64)));

    // Already written layers are not written again.
    assert!(document.export_layers().unwrap().is_empty());

    std::fs::remove_dir_all(&output).unwrap();
}

// ---------------------------------------------------------------------------
// Test: an error reported for the job ends the wait
// ---------------------------------------------------------------------------

#[tokio::test]
async fn server_error_rejects_prompt() {
    let output = scratch_dir();
    let (_document, coordinator) = setup(&output);

    let waiting = tokio::spawn({
        let coordinator = Arc::clone(&coordinator);
        async move { session::generate(&coordinator, "lake").await }
    });

    wait_for_job(&coordinator, "p1").await;
    coordinator
        .handle_message(ClientMessage::error("p1", "Out of memory"))
        .unwrap();

    assert_matches!(
        waiting.await.unwrap(),
        Err(WorkerError::Rejected(message)) if message == "Out of memory"
    );
}

// ---------------------------------------------------------------------------
// Test: a submission failure is returned without waiting
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submission_failure_is_rejected_immediately() {
    let document: Arc<dyn Document> = Arc::new(CanvasDocument::new(
        Image::blank(Extent::new(64, 64)),
        None,
        scratch_dir(),
    ));
    let coordinator = GenerationCoordinator::new(
        document,
        Arc::new(Connection::new()),
        Arc::new(WorkflowSettings::default()),
    );

    let result = session::generate(&coordinator, "lake").await;

    assert_matches!(
        result,
        Err(WorkerError::Rejected(message)) if message.contains("Not connected")
    );
}
