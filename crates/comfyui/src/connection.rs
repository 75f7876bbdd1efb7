//! Connection state machine for the generation server.
//!
//! [`Connection`] owns the attached [`Client`] and publishes its
//! [`ConnectionState`] on a [`tokio::sync::watch`] channel so that the
//! message router can start listening as soon as the server is reachable.

use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::client::{Client, ClientConfig, ComfyClient};
use crate::error::TransportError;
use crate::reconnect::{retry_with_backoff, ReconnectConfig};

/// Connectivity to the generation server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connection attempt failed with this message.
    Error(String),
}

/// Shared handle to the (at most one) attached client.
pub struct Connection {
    state: watch::Sender<ConnectionState>,
    client: RwLock<Option<Arc<dyn Client>>>,
}

impl Connection {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            state,
            client: RwLock::new(None),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    /// Observe state changes.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// The attached client, provided the connection is up.
    pub fn client(&self) -> Result<Arc<dyn Client>, TransportError> {
        if *self.state.borrow() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.client
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .ok_or(TransportError::NotConnected)
    }

    /// Attach an already reachable client and move to `Connected`.
    pub fn attach(&self, client: Arc<dyn Client>) {
        *self.client.write().unwrap_or_else(PoisonError::into_inner) = Some(client);
        self.state.send_replace(ConnectionState::Connected);
        tracing::info!("Connected to generation server");
    }

    /// Drop the client and move to `Disconnected`.
    pub fn disconnect(&self) {
        self.client
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.state.send_replace(ConnectionState::Disconnected);
        tracing::info!("Disconnected from generation server");
    }

    /// Connect to a ComfyUI server, retrying with backoff until it answers.
    ///
    /// The state is `Connecting` while attempts run and `Error` after a
    /// failed attempt; it becomes `Connected` once the server answers.
    pub async fn connect(
        &self,
        config: ClientConfig,
        reconnect: &ReconnectConfig,
        cancel: &CancellationToken,
    ) -> Result<(), TransportError> {
        tracing::info!(api_url = %config.api_url, "Connecting to ComfyUI");
        self.state.send_replace(ConnectionState::Connecting);

        let client = ComfyClient::new(config);
        let result = retry_with_backoff(reconnect, cancel, || async {
            let result = client.check().await;
            if let Err(e) = &result {
                self.state.send_replace(ConnectionState::Error(e.to_string()));
            }
            result
        })
        .await;

        match result {
            Ok(()) => {
                self.attach(Arc::new(client));
                Ok(())
            }
            Err(TransportError::Interrupted) => {
                self.state.send_replace(ConnectionState::Disconnected);
                Err(TransportError::Interrupted)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the server to stop the job currently executing.
    pub async fn interrupt(&self) -> Result<(), TransportError> {
        self.client()?.interrupt().await
    }
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use super::*;
    use crate::client::MessageStream;
    use crate::workflow::ComfyWorkflow;

    struct NullClient;

    #[async_trait]
    impl Client for NullClient {
        async fn enqueue(&self, _workflow: &ComfyWorkflow) -> Result<String, TransportError> {
            Ok("p".into())
        }

        async fn interrupt(&self) -> Result<(), TransportError> {
            Ok(())
        }

        async fn listen(&self) -> Result<MessageStream, TransportError> {
            Err(TransportError::Disconnected)
        }
    }

    #[test]
    fn starts_disconnected_without_client() {
        let conn = Connection::new();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.client(), Err(TransportError::NotConnected)));
    }

    #[test]
    fn attach_connects_and_disconnect_detaches() {
        let conn = Connection::new();
        conn.attach(Arc::new(NullClient));
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert!(conn.client().is_ok());

        conn.disconnect();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(conn.client(), Err(TransportError::NotConnected)));
    }

    #[tokio::test]
    async fn subscribers_see_transitions() {
        let conn = Connection::new();
        let mut rx = conn.subscribe();

        conn.attach(Arc::new(NullClient));
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow_and_update(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn interrupt_requires_connection() {
        let conn = Connection::new();
        assert_matches!(conn.interrupt().await, Err(TransportError::NotConnected));

        conn.attach(Arc::new(NullClient));
        assert!(conn.interrupt().await.is_ok());
    }

    #[tokio::test]
    async fn connect_gives_up_on_unreachable_server() {
        let conn = Connection::new();
        let reconnect = ReconnectConfig {
            initial_delay: std::time::Duration::from_millis(1),
            max_attempts: Some(1),
            ..Default::default()
        };
        let result = conn
            .connect(
                ClientConfig::from_api_url("http://127.0.0.1:9"),
                &reconnect,
                &CancellationToken::new(),
            )
            .await;

        assert_matches!(result, Err(TransportError::Network { .. }));
        assert_matches!(conn.state(), ConnectionState::Error(_));
    }
}
