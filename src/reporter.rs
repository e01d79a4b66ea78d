//! Structured error reporting with secret redaction.
//!
//! Every absorbed failure ends up here. [`ErrorReporter`] builds an
//! [`ErrorContext`], scrubs the API credential out of every string, and hands
//! the result to a [`TelemetrySink`]. Reporting never fails the caller: a sink
//! error or panic falls back to a local `tracing` line and a `false` return.

use crate::error::ErrorCategory;
use crate::error::SearchError;
use crate::transport::{encode_component, TransportError};
use anyhow::anyhow;
use async_trait::async_trait;
use backoff::future::retry;
use backoff::ExponentialBackoffBuilder;
use futures::FutureExt;
use serde::Serialize;
use serde_json::{Map, Value};
use std::error::Error as StdError;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, warn};

/// Replacement for every occurrence of a secret.
pub const REDACTED: &str = "[REDACTED]";

/// Free-form detail fields attached by the failure site.
pub type Details = Map<String, Value>;

/// Structured description of one failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorContext {
    pub category: ErrorCategory,
    pub operation: String,
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub details: Details,
    pub error_type: String,
    pub error_message: String,
    /// `source()` chain, outermost first, excluding the error itself.
    pub error_chain: Vec<String>,
}

/// Destination for error reports.
///
/// `Ok(true)` means the report was accepted. `Ok(false)` and `Err` both count
/// as not delivered.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn report(&self, message: &str, context: &ErrorContext) -> anyhow::Result<bool>;
}

/// Sink that writes reports to the local `tracing` output.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl TelemetrySink for LogSink {
    async fn report(&self, message: &str, context: &ErrorContext) -> anyhow::Result<bool> {
        let details = Value::Object(context.details.clone());
        warn!(
            category = %context.category,
            operation = %context.operation,
            error_type = %context.error_type,
            details = %details,
            "{}",
            message
        );
        Ok(true)
    }
}

/// Sink that POSTs reports as JSON to a collector URL.
///
/// Has its own retry policy: network failures, 429 and 5xx are retried with
/// exponential backoff until `max_elapsed`; other statuses fail immediately.
#[derive(Debug, Clone)]
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    url: String,
    max_elapsed: Duration,
}

impl HttpTelemetrySink {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
            max_elapsed: Duration::from_secs(4),
        }
    }

    pub fn with_max_elapsed(mut self, max_elapsed: Duration) -> Self {
        self.max_elapsed = max_elapsed;
        self
    }
}

#[derive(Serialize)]
struct ReportPayload<'a> {
    message: &'a str,
    context: &'a ErrorContext,
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn report(&self, message: &str, context: &ErrorContext) -> anyhow::Result<bool> {
        let payload = ReportPayload { message, context };
        let client = &self.client;
        let url = self.url.as_str();
        let payload = &payload;

        retry(
            ExponentialBackoffBuilder::new()
                .with_initial_interval(Duration::from_millis(200))
                .with_max_interval(Duration::from_secs(2))
                .with_max_elapsed_time(Some(self.max_elapsed))
                .build(),
            || async move {
                let resp = client
                    .post(url)
                    .json(payload)
                    .send()
                    .await
                    .map_err(|e| backoff::Error::transient(anyhow!("failed to send report: {}", e)))?;
                let status = resp.status();
                if status.is_success() {
                    return Ok(true);
                }
                let err = anyhow!("collector responded with status {}", status);
                if status.is_server_error() || status.as_u16() == 429 {
                    Err(backoff::Error::transient(err))
                } else {
                    Err(backoff::Error::permanent(err))
                }
            },
        )
        .await
    }
}

/// Replaces a secret, raw and percent-encoded, with [`REDACTED`].
#[derive(Clone, Default)]
pub struct Redactor {
    needles: Vec<String>,
}

impl std::fmt::Debug for Redactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Redactor")
            .field("needles", &self.needles.len())
            .finish()
    }
}

impl Redactor {
    pub fn new<I, S>(secrets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut needles: Vec<String> = Vec::new();
        for secret in secrets {
            let raw = secret.as_ref();
            if raw.is_empty() {
                continue;
            }
            for form in [raw.to_string(), encode_component(raw)] {
                if !needles.contains(&form) {
                    needles.push(form);
                }
            }
        }
        // Longest first so a raw secret never leaves half of its encoded form behind.
        needles.sort_by_key(|n| std::cmp::Reverse(n.len()));
        Self { needles }
    }

    pub fn redact(&self, text: &str) -> String {
        let mut out = text.to_string();
        for needle in &self.needles {
            if out.contains(needle.as_str()) {
                out = out.replace(needle.as_str(), REDACTED);
            }
        }
        out
    }

    pub fn redact_value(&self, value: &mut Value) {
        match value {
            Value::String(s) => *s = self.redact(s),
            Value::Array(items) => items.iter_mut().for_each(|v| self.redact_value(v)),
            Value::Object(map) => map.values_mut().for_each(|v| self.redact_value(v)),
            _ => {}
        }
    }

    pub fn redact_context(&self, context: &mut ErrorContext) {
        context.operation = self.redact(&context.operation);
        context.error_type = self.redact(&context.error_type);
        context.error_message = self.redact(&context.error_message);
        for link in context.error_chain.iter_mut() {
            *link = self.redact(link);
        }
        for value in context.details.values_mut() {
            self.redact_value(value);
        }
    }
}

/// Classifies, sanitizes and forwards failures.
#[derive(Clone)]
pub struct ErrorReporter {
    sink: Arc<dyn TelemetrySink>,
    redactor: Redactor,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("sink", &"<dyn TelemetrySink>")
            .field("redactor", &self.redactor)
            .finish()
    }
}

impl ErrorReporter {
    pub fn new(sink: Arc<dyn TelemetrySink>, redactor: Redactor) -> Self {
        Self { sink, redactor }
    }

    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Build the redacted context for a failure without sending it.
    pub fn build_context(
        &self,
        category: ErrorCategory,
        error: &(dyn StdError + Send + Sync + 'static),
        operation: &str,
        details: Details,
    ) -> ErrorContext {
        let mut error_chain = Vec::new();
        let mut source = error.source();
        while let Some(cause) = source {
            error_chain.push(cause.to_string());
            source = cause.source();
        }
        let mut context = ErrorContext {
            category,
            operation: operation.to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            details,
            error_type: error_type_name(error).to_string(),
            error_message: error.to_string(),
            error_chain,
        };
        self.redactor.redact_context(&mut context);
        context
    }

    /// Report a failure. Returns `true` only when the sink accepted it.
    pub async fn report(
        &self,
        category: ErrorCategory,
        error: &(dyn StdError + Send + Sync + 'static),
        operation: &str,
        details: Details,
    ) -> bool {
        let (context, message) = self.prepare(category, error, operation, details);
        self.deliver(context, message).await
    }

    /// Report a failure without waiting for the sink.
    ///
    /// The context is built and redacted before this returns; only delivery
    /// runs on a spawned task. Must be called from within a tokio runtime.
    pub fn spawn_report(
        &self,
        category: ErrorCategory,
        error: &(dyn StdError + Send + Sync + 'static),
        operation: &str,
        details: Details,
    ) -> JoinHandle<bool> {
        let (context, message) = self.prepare(category, error, operation, details);
        let reporter = self.clone();
        tokio::spawn(async move { reporter.deliver(context, message).await })
    }

    fn prepare(
        &self,
        category: ErrorCategory,
        error: &(dyn StdError + Send + Sync + 'static),
        operation: &str,
        details: Details,
    ) -> (ErrorContext, String) {
        let context = self.build_context(category, error, operation, details);
        let message = self
            .redactor
            .redact(&format!("{}: {}", operation, error));
        (context, message)
    }

    async fn deliver(&self, context: ErrorContext, message: String) -> bool {
        let outcome = AssertUnwindSafe(self.sink.report(&message, &context))
            .catch_unwind()
            .await;
        match outcome {
            Ok(Ok(accepted)) => accepted,
            Ok(Err(e)) => {
                error!("{}", fallback_line(&context, &message));
                warn!(
                    "error report not delivered: {}",
                    self.redactor.redact(&e.to_string())
                );
                false
            }
            Err(_) => {
                error!("{}", fallback_line(&context, &message));
                warn!("error report not delivered: telemetry sink panicked");
                false
            }
        }
    }

    pub async fn report_api_error(
        &self,
        error: &(dyn StdError + Send + Sync + 'static),
        operation: &str,
        details: Details,
    ) -> bool {
        self.report(ErrorCategory::ApiError, error, operation, details)
            .await
    }

    pub async fn report_config_error(
        &self,
        error: &(dyn StdError + Send + Sync + 'static),
        operation: &str,
        details: Details,
    ) -> bool {
        self.report(ErrorCategory::ConfigError, error, operation, details)
            .await
    }

    pub async fn report_validation_error(
        &self,
        error: &(dyn StdError + Send + Sync + 'static),
        operation: &str,
        details: Details,
    ) -> bool {
        self.report(ErrorCategory::ValidationError, error, operation, details)
            .await
    }

    pub async fn report_cache_error(
        &self,
        error: &(dyn StdError + Send + Sync + 'static),
        operation: &str,
        details: Details,
    ) -> bool {
        self.report(ErrorCategory::CacheError, error, operation, details)
            .await
    }
}

impl Default for ErrorReporter {
    fn default() -> Self {
        Self::new(Arc::new(LogSink), Redactor::default())
    }
}

/// Minimal local line written when the sink cannot take a report.
/// Inputs are already redacted.
pub fn fallback_line(context: &ErrorContext, message: &str) -> String {
    format!(
        "[{}] {} ({}) at {}",
        context.category, message, context.error_type, context.timestamp
    )
}

fn error_type_name(error: &(dyn StdError + Send + Sync + 'static)) -> &'static str {
    if let Some(e) = error.downcast_ref::<SearchError>() {
        e.kind()
    } else if error.is::<TransportError>() {
        "TransportError"
    } else if error.is::<serde_json::Error>() {
        "JsonError"
    } else {
        "Error"
    }
}
