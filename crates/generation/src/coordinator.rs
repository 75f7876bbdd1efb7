//! Per-document generation state.
//!
//! A [`GenerationCoordinator`] stores the inputs of one document
//! (prompt, strength), launches generation jobs for it, applies server
//! messages to its [`JobQueue`] and manages the preview layer that shows
//! a result on the canvas.
//!
//! All mutable state sits behind one mutex that is never held across an
//! `.await`, so mutations are serialized no matter which task performs
//! them. Observers are notified through [`CoordinatorEvent`]s after the
//! lock has been released.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use easel_comfyui::{ClientEvent, ClientMessage, Connection, TransportError, WorkflowSettings};
use easel_core::{Bounds, CoreError, Image, Mask};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::document::{Document, Layer};
use crate::error::GenerationError;
use crate::events::{CoordinatorEvent, EventBus};
use crate::job::{Job, JobQueue, JobState, Transition};
use crate::report::{report, report_errors, ErrorSink};
use crate::request::GenerationRequest;

const PREVIEW_PREFIX: &str = "[Preview]";
const GENERATED_PREFIX: &str = "[Generated]";

struct CoordinatorState {
    prompt: String,
    strength: f64,
    progress: f64,
    error: String,
    error_details: Option<String>,
    jobs: JobQueue,
    preview: Option<Arc<dyn Layer>>,
}

/// Generation state and job history of one document.
pub struct GenerationCoordinator {
    document: Arc<dyn Document>,
    connection: Arc<Connection>,
    settings: Arc<WorkflowSettings>,
    state: Mutex<CoordinatorState>,
    events: EventBus<CoordinatorEvent>,
}

impl GenerationCoordinator {
    pub fn new(
        document: Arc<dyn Document>,
        connection: Arc<Connection>,
        settings: Arc<WorkflowSettings>,
    ) -> Arc<Self> {
        Arc::new(Self {
            document,
            connection,
            settings,
            state: Mutex::new(CoordinatorState {
                prompt: String::new(),
                strength: 1.0,
                progress: 0.0,
                error: String::new(),
                error_details: None,
                jobs: JobQueue::new(),
                preview: None,
            }),
            events: EventBus::default(),
        })
    }

    /// Receive [`CoordinatorEvent`]s for every committed change.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.events.subscribe()
    }

    // ---- inputs ----

    pub fn prompt(&self) -> String {
        self.lock().prompt.clone()
    }

    pub fn set_prompt(&self, prompt: impl Into<String>) {
        self.lock().prompt = prompt.into();
        self.events.publish(CoordinatorEvent::Changed);
    }

    pub fn strength(&self) -> f64 {
        self.lock().strength
    }

    /// Blend factor between the canvas and a fresh generation, `0.0..=1.0`.
    pub fn set_strength(&self, strength: f64) -> Result<(), CoreError> {
        if !(0.0..=1.0).contains(&strength) {
            return Err(CoreError::Validation(format!(
                "Strength must be between 0 and 1, got {strength}"
            )));
        }
        self.lock().strength = strength;
        self.events.publish(CoordinatorEvent::Changed);
        Ok(())
    }

    // ---- read views ----

    pub fn progress(&self) -> f64 {
        self.lock().progress
    }

    /// Most recent error message; empty when there is none.
    pub fn error(&self) -> String {
        self.lock().error.clone()
    }

    pub fn error_details(&self) -> Option<String> {
        self.lock().error_details.clone()
    }

    /// Snapshot of all jobs in submission order.
    pub fn jobs(&self) -> Vec<Job> {
        self.lock().jobs.iter().cloned().collect()
    }

    pub fn job(&self, id: &str) -> Option<Job> {
        self.lock().jobs.find(id).cloned()
    }

    /// Whether a job with this id was submitted from this document.
    pub fn has_job(&self, id: &str) -> bool {
        self.lock().jobs.contains(id)
    }

    /// Finished jobs in submission order, recomputed on every call.
    ///
    /// A prompt that was interrupted or failed on the server still ends
    /// `Finished`, but without images; such jobs are left out.
    pub fn history(&self) -> Vec<Job> {
        self.lock()
            .jobs
            .iter()
            .filter(|job| job.state() == JobState::Finished && !job.results().is_empty())
            .cloned()
            .collect()
    }

    /// True iff a preview layer exists and is visible.
    pub fn can_apply_result(&self) -> bool {
        self.lock()
            .preview
            .as_ref()
            .is_some_and(|layer| layer.is_visible())
    }

    pub fn is_active(&self) -> bool {
        self.document.is_active()
    }

    pub fn is_valid(&self) -> bool {
        self.document.is_valid()
    }

    // ---- generation ----

    /// Enqueue image generation for the current inputs.
    ///
    /// Reads the selection and canvas synchronously, then submits in a
    /// background task whose handle is returned. Failures are reported on
    /// this coordinator, never returned. Must be called within a Tokio
    /// runtime.
    pub fn generate(self: &Arc<Self>) -> JoinHandle<()> {
        let mask = self.document.create_mask_from_selection();
        let (prompt, strength, preview) = {
            let state = self.lock();
            (state.prompt.clone(), state.strength, state.preview.clone())
        };

        let (canvas, image) = if mask.is_some() || strength < 1.0 {
            let image = self.document.get_image(preview.as_deref());
            (Bounds::from_extent(image.extent()), Some(image))
        } else {
            (Bounds::from_extent(self.document.extent()), None)
        };

        self.clear_error();
        let reset = {
            let mut state = self.lock();
            let idle = !state.jobs.any_executing();
            if idle {
                state.progress = 0.0;
            }
            idle
        };
        if reset {
            self.events.publish(CoordinatorEvent::Changed);
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            report_errors(
                this.as_ref(),
                this.submit(prompt, strength, canvas, image, mask),
            )
            .await;
        })
    }

    async fn submit(
        &self,
        prompt: String,
        strength: f64,
        canvas: Bounds,
        image: Option<Image>,
        mask: Option<Mask>,
    ) -> Result<(), GenerationError> {
        let client = self.connection.client()?;
        // A selection may reach past the canvas edge; only the overlap is sent.
        let mask = mask.map(|mask| mask.clip(canvas)).transpose()?;
        let bounds = mask.as_ref().map_or(canvas, Mask::bounds);
        let request = GenerationRequest::select(&prompt, strength, bounds, image, mask)?;
        let workflow = request.build(&self.settings)?;

        let job_id = client.enqueue(&workflow).await?;
        self.lock().jobs.add(job_id.as_str(), prompt, bounds)?;

        tracing::info!(job_id = %job_id, kind = request.kind(), "Generation job queued");
        self.events.publish(CoordinatorEvent::Changed);
        Ok(())
    }

    /// Ask the server to interrupt the running job.
    ///
    /// Job state is left untouched; the outcome arrives as a later
    /// message.
    pub fn cancel(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            report_errors(this.as_ref(), async {
                this.connection.interrupt().await?;
                Ok(())
            })
            .await;
        })
    }

    /// Apply a server message to the job it refers to.
    ///
    /// An unknown job id is an internal error: the router only hands over
    /// messages for jobs this coordinator holds.
    pub fn handle_message(&self, message: ClientMessage) -> Result<(), GenerationError> {
        let ClientMessage { prompt_id, event } = message;
        let mut guard = self.lock();
        let state = &mut *guard;
        let job = state
            .jobs
            .find_mut(&prompt_id)
            .ok_or_else(|| GenerationError::UnknownJob(prompt_id.clone()))?;

        match event {
            ClientEvent::Progress(value) => {
                if job.begin_executing() == Transition::Ignored {
                    tracing::warn!(job_id = %prompt_id, value, "Progress for finished job ignored");
                    return Ok(());
                }
                drop(guard);
                self.report_progress(value);
            }
            ClientEvent::Finished(images) => {
                let count = images.len();
                if job.finish(images) == Transition::Overwritten {
                    tracing::warn!(job_id = %prompt_id, "Job finished twice, results replaced");
                }
                if count == 0 {
                    tracing::warn!(job_id = %prompt_id, "Job finished without images");
                }
                state.progress = 1.0;
                drop(guard);
                tracing::info!(job_id = %prompt_id, images = count, "Generation job finished");
                self.events.publish(CoordinatorEvent::Changed);
            }
            ClientEvent::Interrupted => {
                drop(guard);
                report(self, &TransportError::Interrupted.into());
            }
            ClientEvent::Error(message) => {
                drop(guard);
                tracing::warn!(job_id = %prompt_id, "{message}");
                self.report_error(message, None);
            }
        }
        Ok(())
    }

    /// Set the progress of the running job and notify subscribers.
    pub fn report_progress(&self, value: f64) {
        self.lock().progress = value;
        self.events.publish(CoordinatorEvent::ProgressChanged);
    }

    /// Clear the error message, notifying only if one was set.
    pub fn clear_error(&self) {
        let cleared = {
            let mut state = self.lock();
            let had_error = !state.error.is_empty();
            state.error.clear();
            state.error_details = None;
            had_error
        };
        if cleared {
            self.events.publish(CoordinatorEvent::Changed);
        }
    }

    // ---- preview ----

    /// Show result `index` of a finished job as a preview layer,
    /// replacing any previous preview.
    pub fn show_preview(&self, job_id: &str, index: usize) -> Result<(), GenerationError> {
        let (name, image, bounds, previous) = {
            let mut state = self.lock();
            let job = state
                .jobs
                .find(job_id)
                .ok_or_else(|| GenerationError::UnknownJob(job_id.to_string()))?;
            let image = job.results().get(index).cloned().ok_or_else(|| {
                GenerationError::Invariant(format!("Job {job_id} has no result {index}"))
            })?;
            let name = format!("{PREVIEW_PREFIX} {}", job.prompt());
            let bounds = job.bounds();
            (name, image, bounds, state.preview.take())
        };

        if let Some(layer) = previous {
            layer.remove();
        }
        let layer = self.document.insert_layer(&name, &image, bounds)?;
        self.lock().preview = Some(layer);
        self.events.publish(CoordinatorEvent::Changed);
        Ok(())
    }

    pub fn hide_preview(&self) {
        let preview = self.lock().preview.clone();
        if let Some(layer) = preview {
            layer.set_visible(false);
            self.events.publish(CoordinatorEvent::Changed);
        }
    }

    /// Promote the visible preview to a regular layer.
    pub fn apply_current_result(&self) -> Result<(), GenerationError> {
        if !self.can_apply_result() {
            return Err(GenerationError::Invariant(
                "No visible preview to apply".to_string(),
            ));
        }
        let layer = self.lock().preview.take().ok_or_else(|| {
            GenerationError::Invariant("Preview disappeared while applying".to_string())
        })?;
        layer.set_locked(false);
        layer.set_name(&layer.name().replacen(PREVIEW_PREFIX, GENERATED_PREFIX, 1));
        self.events.publish(CoordinatorEvent::Changed);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, CoordinatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ErrorSink for GenerationCoordinator {
    /// The most recent error replaces the previous one.
    fn report_error(&self, message: String, details: Option<String>) {
        {
            let mut state = self.lock();
            state.error = message;
            state.error_details = details;
        }
        self.events.publish(CoordinatorEvent::Changed);
    }
}
