//! REST client for the ComfyUI HTTP endpoints.
//!
//! Wraps workflow submission, interruption and the `/system_stats`
//! health probe using [`reqwest`]. Failures surface as
//! [`TransportError::Network`] carrying the endpoint and status code.

use serde::Deserialize;

use crate::error::TransportError;

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

/// Response of `POST /prompt`.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    pub number: i32,
}

impl ComfyUIApi {
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url,
        }
    }

    /// Queue a workflow. Returns as soon as the server has accepted it.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
        client_id: &str,
    ) -> Result<SubmitResponse, TransportError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });
        let url = format!("{}/prompt", self.api_url);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, &e))?;

        Self::parse_response(&url, response).await
    }

    /// Interrupt whatever is executing right now.
    pub async fn interrupt(&self) -> Result<(), TransportError> {
        let url = format!("{}/interrupt", self.api_url);
        let response = self
            .client
            .post(&url)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, &e))?;

        Self::ensure_success(&url, response).await.map(|_| ())
    }

    /// Probe the server; used to decide whether a connection is usable.
    pub async fn system_stats(&self) -> Result<serde_json::Value, TransportError> {
        let url = format!("{}/system_stats", self.api_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| TransportError::request(&url, &e))?;

        Self::parse_response(&url, response).await
    }

    // ---- private helpers ----

    async fn ensure_success(
        url: &str,
        response: reqwest::Response,
    ) -> Result<reqwest::Response, TransportError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Network {
                message: format!("Server rejected the request: {body}"),
                url: url.to_string(),
                code: Some(status.as_u16()),
            });
        }
        Ok(response)
    }

    async fn parse_response<T: serde::de::DeserializeOwned>(
        url: &str,
        response: reqwest::Response,
    ) -> Result<T, TransportError> {
        let response = Self::ensure_success(url, response).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| TransportError::request(url, &e))
    }
}
