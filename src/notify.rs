//! Push notification delivery via an ntfy-compatible gateway.
//!
//! A fire is delivered as `POST {base_url}/{topic}` with the message as
//! the request body and an optional `Title` header. Any 2xx response
//! counts as delivered; everything else is reported to the caller and
//! recorded, never retried here.

use std::time::Duration;

use crate::config::GatewayConfig;

/// Longest gateway response excerpt carried in an error.
const MAX_DETAIL_LEN: usize = 200;

/// HTTP client for the push gateway.
pub struct Notifier {
    base_url: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

/// Errors from a delivery attempt.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),

    #[error("gateway did not respond within {0}s")]
    Timeout(u64),

    #[error("could not connect to gateway: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("gateway returned HTTP {status}: {detail}")]
    Gateway { status: u16, detail: String },
}

impl Notifier {
    /// Build a notifier with a bounded per-request timeout.
    pub fn new(config: &GatewayConfig) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| NotifyError::Client(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            client,
            timeout_secs: config.timeout_secs,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Deliver one notification to `{base_url}/{topic}`.
    pub async fn send(&self, topic: &str, title: &str, message: &str) -> Result<(), NotifyError> {
        let url = format!("{}/{}", self.base_url, topic);
        let mut request = self.client.post(&url).body(message.to_owned());
        if !title.is_empty() {
            request = request.header("Title", title);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let detail: String = body.chars().take(MAX_DETAIL_LEN).collect();
        Err(NotifyError::Gateway {
            status: status.as_u16(),
            detail,
        })
    }

    fn classify(&self, err: reqwest::Error) -> NotifyError {
        if err.is_timeout() {
            NotifyError::Timeout(self.timeout_secs)
        } else if err.is_connect() {
            NotifyError::Connect(err.to_string())
        } else {
            NotifyError::Transport(err.to_string())
        }
    }
}
