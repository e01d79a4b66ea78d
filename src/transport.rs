//! HTTP transport capability used by the request pipeline.
//!
//! The pipeline only depends on [`Transport`]; production code plugs in
//! [`ReqwestTransport`], tests plug in counting fakes.

use async_trait::async_trait;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Characters left unescaped by JavaScript's `encodeURIComponent`.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Percent-encode a single query-string component.
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, URI_COMPONENT).to_string()
}

/// Per-request options.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub timeout: Duration,
    pub headers: HashMap<String, String>,
}

/// A successful (2xx) response.
#[derive(Debug, Clone, Default)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
    pub headers: HashMap<String, String>,
}

/// Network failure, timeout, or non-2xx status.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct TransportError {
    pub status: Option<u16>,
    pub body: Option<String>,
    pub message: String,
}

impl TransportError {
    pub fn network(message: impl Into<String>) -> Self {
        Self {
            status: None,
            body: None,
            message: message.into(),
        }
    }

    pub fn status(status: u16, body: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            body: Some(body.into()),
            message: format!("request failed with status {status}"),
        }
    }
}

/// Generic async HTTP GET.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError>;
}

/// [`Transport`] backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError> {
        let mut request = self.client.get(url).timeout(options.timeout);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::network(format!("request timed out after {:?}", options.timeout))
            } else {
                // Strip the URL: it carries the credential.
                TransportError::network(format!("failed to send request: {}", e.without_url()))
            }
        })?;

        let status = resp.status();
        let headers = resp
            .headers()
            .iter()
            .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.as_str().to_string(), v.to_string())))
            .collect();
        let body = resp
            .text()
            .await
            .map_err(|e| TransportError::network(format!("failed to read response body: {}", e.without_url())))?;
        debug!(status = status.as_u16(), bytes = body.len(), "provider responded");

        if !status.is_success() {
            return Err(TransportError::status(status.as_u16(), body));
        }
        Ok(TransportResponse {
            status: status.as_u16(),
            body,
            headers,
        })
    }
}
