//! Routing server messages to the coordinator that owns the job.
//!
//! One [`MessageRouter`] exists per process. It keeps the set of
//! per-document coordinators and runs a single receive loop: wait until
//! the connection is up, listen, hand every message to the coordinator
//! whose queue holds the job, and when the session fails report the error
//! to all coordinators, back off and listen again. Only cancellation (see
//! [`MessageRouter::shutdown`]) ends the loop.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use easel_comfyui::{ClientMessage, Connection, ConnectionState, TransportError, WorkflowSettings};
use futures::StreamExt;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::coordinator::GenerationCoordinator;
use crate::document::Host;
use crate::error::GenerationError;
use crate::events::EventBus;
use crate::report::{report_errors, ErrorSink};

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Pause between a failed listening session and the next attempt.
    pub backoff: Duration,
    /// How long [`MessageRouter::shutdown`] waits for each task.
    pub shutdown_timeout: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Process-wide registry of coordinators and owner of the receive loop.
pub struct MessageRouter {
    connection: Arc<Connection>,
    host: Arc<dyn Host>,
    settings: Arc<WorkflowSettings>,
    config: RouterConfig,
    coordinators: RwLock<Vec<Arc<GenerationCoordinator>>>,
    receive_task: Mutex<Option<JoinHandle<()>>>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    created: EventBus<Arc<GenerationCoordinator>>,
    cancel: CancellationToken,
}

impl MessageRouter {
    pub fn new(
        connection: Arc<Connection>,
        host: Arc<dyn Host>,
        settings: WorkflowSettings,
        config: RouterConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            connection,
            host,
            settings: Arc::new(settings),
            config,
            coordinators: RwLock::new(Vec::new()),
            receive_task: Mutex::new(None),
            watch_task: Mutex::new(None),
            created: EventBus::default(),
            cancel: CancellationToken::new(),
        })
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Start listening whenever the connection becomes `Connected`.
    ///
    /// Idempotent. The router keeps itself alive through its tasks until
    /// [`shutdown`](Self::shutdown) is called.
    pub fn start(self: &Arc<Self>) {
        let mut slot = lock(&self.watch_task);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }

        let this = Arc::clone(self);
        let mut state = self.connection.subscribe();
        *slot = Some(tokio::spawn(async move {
            loop {
                if *state.borrow_and_update() == ConnectionState::Connected {
                    this.ensure_listening();
                }
                tokio::select! {
                    biased;
                    _ = this.cancel.cancelled() => break,
                    changed = state.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("Connection watcher stopped");
        }));
    }

    /// Spawn the receive loop unless it is already running.
    pub fn ensure_listening(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let mut slot = lock(&self.receive_task);
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        tracing::info!("Starting message receive loop");
        *slot = Some(tokio::spawn(Arc::clone(self).run_receive_loop()));
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.receive_task)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Notified with every coordinator created on demand.
    pub fn subscribe_created(&self) -> broadcast::Receiver<Arc<GenerationCoordinator>> {
        self.created.subscribe()
    }

    /// Registered coordinators in creation order.
    pub fn coordinators(&self) -> Vec<Arc<GenerationCoordinator>> {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The coordinator of the active document, created if needed.
    ///
    /// Coordinators of closed documents are dropped on the way. Returns
    /// `None` when the host has no active document.
    pub fn coordinator_for_active_document(&self) -> Option<Arc<GenerationCoordinator>> {
        let created = {
            let mut coordinators = self
                .coordinators
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            coordinators.retain(|c| c.is_valid());

            if let Some(existing) = coordinators.iter().find(|c| c.is_active()) {
                return Some(Arc::clone(existing));
            }

            let document = self.host.active_document()?;
            let coordinator = GenerationCoordinator::new(
                document,
                Arc::clone(&self.connection),
                Arc::clone(&self.settings),
            );
            coordinators.push(Arc::clone(&coordinator));
            coordinator
        };

        tracing::debug!("Created coordinator for active document");
        self.created.publish(Arc::clone(&created));
        Some(created)
    }

    /// The coordinator whose queue holds `prompt_id`.
    pub fn find_coordinator(&self, prompt_id: &str) -> Option<Arc<GenerationCoordinator>> {
        self.coordinators
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|c| c.has_job(prompt_id))
            .cloned()
    }

    /// Hand one message to the coordinator owning its job.
    ///
    /// Messages for jobs submitted elsewhere (another client sharing the
    /// server, or a closed document) are dropped.
    pub fn dispatch(&self, message: ClientMessage) -> Result<(), GenerationError> {
        match self.find_coordinator(&message.prompt_id) {
            Some(coordinator) => coordinator.handle_message(message),
            None => {
                tracing::debug!(prompt_id = %message.prompt_id, "Dropping message for unknown job");
                Ok(())
            }
        }
    }

    async fn run_receive_loop(self: Arc<Self>) {
        let mut state = self.connection.subscribe();
        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                connected = wait_connected(&mut state) => {
                    if connected.is_err() {
                        break;
                    }
                }
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = report_errors(self.as_ref(), self.receive_messages()) => {}
            }

            tracing::debug!(backoff = ?self.config.backoff, "Listening again after backoff");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.backoff) => {}
            }
        }
        tracing::info!("Message receive loop stopped");
    }

    /// One listening session; only ever ends with an error.
    async fn receive_messages(&self) -> Result<(), GenerationError> {
        let client = self.connection.client()?;
        let mut messages = client.listen().await?;

        while let Some(message) = messages.next().await {
            self.dispatch(message?)?;
        }
        Err(TransportError::Disconnected.into())
    }

    /// Stop the receive loop and the connection watcher.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        let tasks = [lock(&self.watch_task).take(), lock(&self.receive_task).take()];
        for task in tasks.into_iter().flatten() {
            if tokio::time::timeout(self.config.shutdown_timeout, task)
                .await
                .is_err()
            {
                tracing::warn!("Router task did not stop in time");
            }
        }
        tracing::info!("Message router shut down");
    }
}

impl ErrorSink for MessageRouter {
    /// A failed session concerns every document: each coordinator gets it.
    fn report_error(&self, message: String, details: Option<String>) {
        for coordinator in self.coordinators() {
            coordinator.report_error(message.clone(), details.clone());
        }
    }
}

async fn wait_connected(
    state: &mut watch::Receiver<ConnectionState>,
) -> Result<(), watch::error::RecvError> {
    state
        .wait_for(|s| *s == ConnectionState::Connected)
        .await
        .map(|_| ())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
