//! HTTP transport seam between backend strategies and the network.
//!
//! Strategies only build JSON envelopes and read JSON replies; the transport
//! owns the socket, the timeout and HTTP status handling. Tests swap in a
//! stub transport and never touch the network.

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::error::AnalyzerError;

/// Longest error body kept in a [`TransportError::Status`].
const MAX_ERROR_BODY: usize = 500;

/// Failure of a single HTTP exchange.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("request timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("response is not valid JSON: {0}")]
    Decode(String),
}

/// POST a JSON body, receive a JSON body.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, TransportError>;
}

/// Production transport on a shared `reqwest` client.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    timeout_secs: u64,
}

impl ReqwestTransport {
    /// Build a client whose every request is bounded by `timeout_secs`.
    pub fn new(timeout_secs: u64) -> Result<Self, AnalyzerError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| AnalyzerError::Internal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            timeout_secs,
        })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, String)],
        body: &Value,
    ) -> Result<Value, TransportError> {
        let mut request = self.client.post(url).json(body);
        for (name, value) in headers {
            request = request.header(*name, value.as_str());
        }

        debug!("POST {}", url);
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                TransportError::Network(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: truncate(&body, MAX_ERROR_BODY),
            });
        }

        response.json::<Value>().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout {
                    secs: self.timeout_secs,
                }
            } else {
                TransportError::Decode(e.to_string())
            }
        })
    }
}

fn truncate(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_chars).collect();
        format!("{head}\u{2026}")
    }
}
