//! Outbound forwarding of hook events and ETASU requests to administrators.

use std::time::Duration;

use axum::body::Bytes;
use reqwest::header::CONTENT_TYPE;
use rems_core::CdsResponse;
use serde_json::Value;
use tracing::{debug, instrument, warn};

/// Why a forward produced no usable response.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("request to {url} timed out after {timeout_ms} ms")]
    Timeout { url: String, timeout_ms: u128 },

    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("unreadable response from {url}: {message}")]
    Body { url: String, message: String },
}

impl ForwardError {
    /// Short failure kind for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout { .. } => "timeout",
            Self::Connect { .. } => "connect",
            Self::Status { .. } => "status",
            Self::Request { .. } => "request",
            Self::Body { .. } => "body",
        }
    }

    fn from_reqwest(url: &str, timeout: Duration, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                url: url.to_string(),
                timeout_ms: timeout.as_millis(),
            }
        } else if err.is_connect() {
            Self::Connect {
                url: url.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Request {
                url: url.to_string(),
                message: err.to_string(),
            }
        }
    }
}

/// POSTs JSON bodies to administrator endpoints with a bounded timeout.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    /// Forwards `body` and returns the downstream response body verbatim.
    #[instrument(skip(self, body), fields(bytes = body.len()))]
    pub async fn forward(&self, url: &str, body: Bytes) -> Result<Bytes, ForwardError> {
        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| ForwardError::from_reqwest(url, self.timeout, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let bytes = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                ForwardError::from_reqwest(url, self.timeout, e)
            } else {
                ForwardError::Body {
                    url: url.to_string(),
                    message: e.to_string(),
                }
            }
        })?;
        debug!(status = %status, bytes = bytes.len(), "Forward completed");
        Ok(bytes)
    }

    /// Forwards `body` and returns the cards of the downstream response.
    pub async fn forward_cards(&self, url: &str, body: Bytes) -> Result<Vec<Value>, ForwardError> {
        let bytes = self.forward(url, body).await?;
        let parsed: Value = serde_json::from_slice(&bytes).map_err(|e| ForwardError::Body {
            url: url.to_string(),
            message: e.to_string(),
        })?;
        let cards = CdsResponse::cards_in(&parsed);
        if cards.is_empty() && parsed.get("cards").is_none() {
            warn!(url, "Administrator response has no cards member");
        }
        Ok(cards)
    }
}
