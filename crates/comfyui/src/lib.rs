//! ComfyUI transport for easel.
//!
//! Provides the [`Client`] seam the generation core talks to, its
//! ComfyUI implementation ([`ComfyClient`]: REST submission plus a
//! WebSocket listener), the [`Connection`] state machine, reconnection
//! backoff, and the workflow graph builder.

pub mod api;
pub mod client;
pub mod connection;
pub mod error;
pub mod events;
pub mod listener;
pub mod messages;
pub mod reconnect;
pub mod workflow;

pub use client::{Client, ClientConfig, ComfyClient, MessageStream};
pub use connection::{Connection, ConnectionState};
pub use error::TransportError;
pub use events::{ClientEvent, ClientMessage};
pub use workflow::{ComfyWorkflow, WorkflowSettings};
