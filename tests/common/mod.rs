#![allow(dead_code)]

use async_trait::async_trait;
use cse_search::reporter::{ErrorContext, TelemetrySink};
use cse_search::scheduler::RateConfig;
use cse_search::transport::{RequestOptions, Transport, TransportError, TransportResponse};
use cse_search::{AppState, ErrorCategory, SearchConfig};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const API_KEY: &str = "test key/with&chars";
pub const API_KEY_ENCODED: &str = "test%20key%2Fwith%26chars";

type Responder = dyn Fn(&str) -> Result<TransportResponse, TransportError> + Send + Sync;

/// Transport fake that counts calls and answers through a closure.
pub struct FakeTransport {
    responder: Box<Responder>,
    delay: Duration,
    calls: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
    requests: Mutex<Vec<(String, RequestOptions)>>,
}

impl FakeTransport {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Result<TransportResponse, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Answers every query with one item linking to `https://<q>.example/`.
    pub fn echo() -> Self {
        Self::new(|url| ok_body(&items_body(&[&format!("https://{}.example/", query_param(url))])))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(String, RequestOptions)> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn get(
        &self,
        url: &str,
        options: &RequestOptions,
    ) -> Result<TransportResponse, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests
            .lock()
            .unwrap()
            .push((url.to_string(), options.clone()));
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        self.running.fetch_sub(1, Ordering::SeqCst);
        (self.responder)(url)
    }
}

/// Sink that keeps every report.
#[derive(Default)]
pub struct RecordingSink {
    reports: Mutex<Vec<(String, ErrorContext)>>,
}

impl RecordingSink {
    pub fn reports(&self) -> Vec<(String, ErrorContext)> {
        self.reports.lock().unwrap().clone()
    }

    pub fn categories(&self) -> Vec<ErrorCategory> {
        self.reports().into_iter().map(|(_, c)| c.category).collect()
    }
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn report(&self, message: &str, context: &ErrorContext) -> anyhow::Result<bool> {
        self.reports
            .lock()
            .unwrap()
            .push((message.to_string(), context.clone()));
        Ok(true)
    }
}

pub fn online_config() -> SearchConfig {
    SearchConfig {
        api_key: Some(API_KEY.into()),
        search_engine_id: Some("engine-1".into()),
        ..Default::default()
    }
}

pub fn fast_rate() -> RateConfig {
    RateConfig {
        min_spacing: Duration::ZERO,
        ..Default::default()
    }
}

pub fn state_with(
    config: SearchConfig,
    transport: Arc<FakeTransport>,
    sink: Arc<RecordingSink>,
) -> AppState {
    AppState::with_parts(config, transport, sink)
}

pub fn ok_body(body: &str) -> Result<TransportResponse, TransportError> {
    Ok(TransportResponse {
        status: 200,
        body: body.to_string(),
        headers: Default::default(),
    })
}

pub fn items_body(links: &[&str]) -> String {
    let items: Vec<serde_json::Value> = links
        .iter()
        .enumerate()
        .map(|(i, link)| {
            serde_json::json!({
                "title": format!("Result {i}"),
                "snippet": format!("Snippet {i}"),
                "link": link,
            })
        })
        .collect();
    serde_json::json!({ "items": items }).to_string()
}

/// Decoded `q` parameter of a provider URL.
pub fn query_param(url: &str) -> String {
    let parsed = url::Url::parse(url).expect("provider URL should parse");
    parsed
        .query_pairs()
        .find(|(k, _)| k == "q")
        .map(|(_, v)| v.into_owned())
        .unwrap_or_default()
}

/// Let detached report deliveries run.
pub async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}
