//! Transport-level errors.

/// Errors raised while talking to a ComfyUI server.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The server could not be reached or answered with an error status.
    #[error("{message}")]
    Network {
        message: String,
        /// Endpoint that failed.
        url: String,
        /// HTTP status code, when the server answered at all.
        code: Option<u16>,
    },

    /// The running operation was interrupted on request.
    #[error("Operation was interrupted")]
    Interrupted,

    /// No client is attached to the connection.
    #[error("Not connected to the generation server")]
    NotConnected,

    /// The message stream ended.
    #[error("Connection to the generation server was closed")]
    Disconnected,

    /// The server sent something we could not make sense of.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub(crate) fn request(url: impl Into<String>, err: &reqwest::Error) -> Self {
        Self::Network {
            message: format!("Could not reach the generation server: {err}"),
            url: url.into(),
            code: err.status().map(|s| s.as_u16()),
        }
    }

    pub(crate) fn websocket(url: impl Into<String>, err: &tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network {
            message: format!("WebSocket error: {err}"),
            url: url.into(),
            code: None,
        }
    }
}
