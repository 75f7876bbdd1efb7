//! The [`Client`] seam and its ComfyUI implementation.
//!
//! The generation core only ever sees `Arc<dyn Client>`; [`ComfyClient`]
//! implements it against a real server, tests implement it in memory.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tokio_tungstenite::connect_async;

use crate::api::ComfyUIApi;
use crate::error::TransportError;
use crate::events::ClientMessage;
use crate::listener::message_stream;
use crate::workflow::ComfyWorkflow;

/// Potentially infinite sequence of job events from one listening session.
pub type MessageStream = BoxStream<'static, Result<ClientMessage, TransportError>>;

/// Operations the generation core needs from the transport.
#[async_trait]
pub trait Client: Send + Sync {
    /// Queue a workflow and return the server-assigned job id.
    ///
    /// Resolves once the server has accepted the job, not when it is done.
    async fn enqueue(&self, workflow: &ComfyWorkflow) -> Result<String, TransportError>;

    /// Interrupt the job currently executing on the server.
    async fn interrupt(&self) -> Result<(), TransportError>;

    /// Open a listening session. The stream ends when the session drops.
    async fn listen(&self) -> Result<MessageStream, TransportError>;
}

/// Server endpoints.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// HTTP base URL, e.g. `http://127.0.0.1:8188`.
    pub api_url: String,
    /// WebSocket base URL, e.g. `ws://127.0.0.1:8188`.
    pub ws_url: String,
}

impl ClientConfig {
    /// Derive both endpoints from the HTTP base URL.
    pub fn from_api_url(api_url: &str) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        let ws_url = if let Some(rest) = api_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = api_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            format!("ws://{api_url}")
        };
        Self { api_url, ws_url }
    }
}

/// ComfyUI implementation of [`Client`].
///
/// One random `client_id` is used for both submission and listening so
/// that the server addresses a prompt's messages to our socket.
pub struct ComfyClient {
    config: ClientConfig,
    client_id: String,
    api: ComfyUIApi,
}

impl ComfyClient {
    pub fn new(config: ClientConfig) -> Self {
        let api = ComfyUIApi::new(config.api_url.clone());
        Self {
            config,
            client_id: uuid::Uuid::new_v4().to_string(),
            api,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Check that the server answers.
    pub async fn check(&self) -> Result<(), TransportError> {
        self.api.system_stats().await?;
        Ok(())
    }
}

#[async_trait]
impl Client for ComfyClient {
    async fn enqueue(&self, workflow: &ComfyWorkflow) -> Result<String, TransportError> {
        let response = self
            .api
            .submit_workflow(&workflow.to_json(), &self.client_id)
            .await?;
        tracing::info!(
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            nodes = workflow.node_count(),
            "Workflow submitted to ComfyUI",
        );
        Ok(response.prompt_id)
    }

    async fn interrupt(&self) -> Result<(), TransportError> {
        tracing::info!(api_url = %self.config.api_url, "Interrupting current execution");
        self.api.interrupt().await
    }

    async fn listen(&self) -> Result<MessageStream, TransportError> {
        let url = format!("{}/ws?clientId={}", self.config.ws_url, self.client_id);
        let (ws, _response) = connect_async(&url)
            .await
            .map_err(|e| TransportError::websocket(&url, &e))?;

        tracing::info!(client_id = %self.client_id, "Listening on {}", self.config.ws_url);
        Ok(message_stream(ws, url))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ws_url_derived_from_http() {
        let config = ClientConfig::from_api_url("http://127.0.0.1:8188/");
        assert_eq!(config.api_url, "http://127.0.0.1:8188");
        assert_eq!(config.ws_url, "ws://127.0.0.1:8188");
    }

    #[test]
    fn wss_url_derived_from_https() {
        let config = ClientConfig::from_api_url("https://gpu.example.com");
        assert_eq!(config.ws_url, "wss://gpu.example.com");
    }

    #[test]
    fn bare_host_gets_ws_scheme() {
        let config = ClientConfig::from_api_url("localhost:8188");
        assert_eq!(config.ws_url, "ws://localhost:8188");
    }

    #[test]
    fn client_ids_are_unique() {
        let config = ClientConfig::from_api_url("http://localhost:8188");
        let a = ComfyClient::new(config.clone());
        let b = ComfyClient::new(config);
        assert_ne!(a.client_id(), b.client_id());
    }
}
