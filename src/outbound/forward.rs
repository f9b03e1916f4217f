//! Verbatim relay of card-action payloads to an upstream service.

use std::time::Duration;

use axum::body::Bytes;
use reqwest::header::CONTENT_TYPE;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a forward failed. The caller treats every variant the same way.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("upstream timed out after {}s", .0.as_secs_f32())]
    Timeout(Duration),

    #[error("upstream unreachable: {0}")]
    Network(String),

    #[error("upstream returned HTTP {status}")]
    UpstreamStatus { status: u16, body: String },
}

/// A successful (2xx) upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Bytes,
}

/// POSTs payloads unchanged to an upstream URL.
#[derive(Debug, Clone)]
pub struct Forwarder {
    client: reqwest::Client,
    timeout: Duration,
}

impl Forwarder {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        Forwarder { client, timeout }
    }

    /// Sends `payload` to `url` as `application/json`, byte for byte.
    ///
    /// Connection failures, timeouts and non-2xx statuses are all errors.
    pub async fn forward(&self, url: &str, payload: Bytes) -> Result<ForwardResponse, ForwardError> {
        let response = self
            .client
            .post(url)
            .timeout(self.timeout)
            .header(CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = response.bytes().await.map_err(|e| self.classify(e))?;

        debug!(url, status = status.as_u16(), "Upstream responded");

        if !status.is_success() {
            warn!(url, status = status.as_u16(), "Upstream rejected forwarded payload");
            return Err(ForwardError::UpstreamStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        Ok(ForwardResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }

    fn classify(&self, err: reqwest::Error) -> ForwardError {
        if err.is_timeout() {
            ForwardError::Timeout(self.timeout)
        } else {
            ForwardError::Network(err.to_string())
        }
    }
}
