//! Change notifications backed by `tokio::sync::broadcast`.
//!
//! Presentation layers subscribe instead of polling; every committed
//! state change publishes one event after the state lock is released.

use tokio::sync::broadcast;

/// What changed on a coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorEvent {
    /// Prompt, error, job list or a job's state changed.
    Changed,
    /// Only the progress value changed.
    ProgressChanged,
}

const DEFAULT_CAPACITY: usize = 64;

/// In-process fan-out of events of type `T`.
pub(crate) struct EventBus<T> {
    sender: broadcast::Sender<T>,
}

impl<T: Clone> EventBus<T> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish to all current subscribers; dropped if there are none.
    pub(crate) fn publish(&self, event: T) {
        let _ = self.sender.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<T> {
        self.sender.subscribe()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
