//! Running prompts to completion on a coordinator.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use easel_generation::{CoordinatorEvent, GenerationCoordinator, Job, JobState};
use tokio::sync::broadcast::error::RecvError;

use crate::document::CanvasDocument;
use crate::error::WorkerError;

/// Submit `prompt` and wait until its job has finished.
///
/// Fails with [`WorkerError::Rejected`] as soon as the coordinator
/// reports an error.
pub async fn generate(
    coordinator: &Arc<GenerationCoordinator>,
    prompt: &str,
) -> Result<Job, WorkerError> {
    let mut events = coordinator.subscribe();
    let known: HashSet<String> = coordinator
        .jobs()
        .iter()
        .map(|job| job.id().to_string())
        .collect();

    coordinator.set_prompt(prompt);
    coordinator.generate().await?;

    let Some(job_id) = coordinator
        .jobs()
        .into_iter()
        .map(|job| job.id().to_string())
        .find(|id| !known.contains(id))
    else {
        return Err(WorkerError::Rejected(coordinator.error()));
    };
    tracing::info!(job_id = %job_id, prompt, "Waiting for job");

    loop {
        if let Some(job) = coordinator.job(&job_id) {
            if job.state() == JobState::Finished {
                return Ok(job);
            }
        }
        let error = coordinator.error();
        if !error.is_empty() {
            return Err(WorkerError::Rejected(error));
        }

        match events.recv().await {
            Ok(CoordinatorEvent::ProgressChanged) => {
                tracing::debug!(job_id = %job_id, progress = coordinator.progress(), "Progress");
            }
            Ok(CoordinatorEvent::Changed) | Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => {
                return Err(WorkerError::Rejected("Coordinator closed".to_string()));
            }
        }
    }
}

/// Apply every result of a finished job as a layer and write the new
/// layers to the document's output directory.
pub fn apply_results(
    coordinator: &GenerationCoordinator,
    document: &CanvasDocument,
    job: &Job,
) -> Result<Vec<PathBuf>, WorkerError> {
    for index in 0..job.results().len() {
        coordinator.show_preview(job.id(), index)?;
        coordinator.apply_current_result()?;
    }
    document.export_layers()
}
