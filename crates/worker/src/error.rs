use easel_comfyui::TransportError;
use easel_core::CoreError;
use easel_generation::GenerationError;

use crate::config::ConfigError;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The coordinator reported an error for the submitted prompt.
    #[error("{0}")]
    Rejected(String),

    #[error("No active document")]
    NoDocument,
}
