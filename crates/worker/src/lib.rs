//! Headless easel host.
//!
//! Connects to a ComfyUI server, reads prompts line by line and writes
//! each generated image as a PNG layer file.

pub mod config;
pub mod document;
pub mod error;
pub mod session;

pub use config::{ConfigError, WorkerConfig};
pub use document::{CanvasDocument, WorkerHost};
pub use error::WorkerError;
