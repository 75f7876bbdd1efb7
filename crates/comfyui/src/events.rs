//! Job-level events produced by the listener.
//!
//! These are what the generation core consumes: raw ComfyUI frames are
//! folded into one [`ClientMessage`] per meaningful change of a prompt.

use easel_core::ImageCollection;

/// What happened to a prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// Sampling progress as a fraction in `0.0..=1.0`.
    Progress(f64),

    /// The prompt completed; carries every image it sent back.
    Finished(ImageCollection),

    /// The prompt was stopped by an interrupt request.
    Interrupted,

    /// The server reported an execution error.
    Error(String),
}

/// An event correlated to a prompt by its server-assigned id.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientMessage {
    pub prompt_id: String,
    pub event: ClientEvent,
}

impl ClientMessage {
    pub fn progress(prompt_id: impl Into<String>, value: f64) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            event: ClientEvent::Progress(value),
        }
    }

    pub fn finished(prompt_id: impl Into<String>, images: ImageCollection) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            event: ClientEvent::Finished(images),
        }
    }

    pub fn interrupted(prompt_id: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            event: ClientEvent::Interrupted,
        }
    }

    pub fn error(prompt_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            event: ClientEvent::Error(message.into()),
        }
    }
}
