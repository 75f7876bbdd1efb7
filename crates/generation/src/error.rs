use easel_comfyui::TransportError;
use easel_core::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A server message referenced a job no queue knows about.
    #[error("Received message for unknown job {0}")]
    UnknownJob(String),

    #[error("Job {0} was added twice")]
    DuplicateJob(String),

    /// A request shape the workflow layer cannot build.
    #[error("Not implemented: {0}")]
    Unsupported(&'static str),

    /// A documented precondition did not hold.
    #[error("{0}")]
    Invariant(String),
}

impl GenerationError {
    /// Programming errors, as opposed to environmental failures.
    pub fn is_internal(&self) -> bool {
        match self {
            Self::UnknownJob(_)
            | Self::DuplicateJob(_)
            | Self::Unsupported(_)
            | Self::Invariant(_) => true,
            Self::Core(CoreError::Internal(_)) => true,
            Self::Core(_) | Self::Transport(_) => false,
        }
    }
}
