//! Generation job coordination.
//!
//! - [`JobQueue`] / [`Job`]: per-document job history and state machine.
//! - [`GenerationCoordinator`]: per-document generation state; submits
//!   jobs and applies server messages to them.
//! - [`MessageRouter`]: the single receive loop that fans server
//!   messages out to coordinators and survives disconnects.
//! - [`report`]: the error boundary around every background task.

pub mod coordinator;
pub mod document;
pub mod error;
pub mod events;
pub mod job;
pub mod report;
pub mod request;
pub mod router;

pub use coordinator::GenerationCoordinator;
pub use document::{Document, Host, Layer, LayerId};
pub use error::GenerationError;
pub use events::CoordinatorEvent;
pub use job::{Job, JobQueue, JobState};
pub use request::GenerationRequest;
pub use router::{MessageRouter, RouterConfig};
