pub mod cache;
pub mod config;
pub mod error;
pub mod key;
pub mod logging;
pub mod reporter;
pub mod scheduler;
pub mod search;
pub mod server;
pub mod transport;
pub mod types;

pub use config::SearchConfig;
pub use error::{ErrorCategory, Result, SearchError};
pub use types::*;

use cache::ResultCache;
use reporter::{ErrorReporter, HttpTelemetrySink, LogSink, Redactor, TelemetrySink};
use scheduler::Scheduler;
use std::sync::Arc;
use transport::{ReqwestTransport, Transport};

/// Process-wide state shared by every pipeline call.
///
/// Built once at startup and passed explicitly; tests build a fresh one each.
#[derive(Clone)]
pub struct AppState {
    pub config: SearchConfig,
    pub transport: Arc<dyn Transport>,
    // Caches for performance
    pub cache: Arc<ResultCache>,
    // Rate and concurrency control for provider calls
    pub scheduler: Arc<Scheduler>,
    pub reporter: ErrorReporter,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("offline", &self.config.offline)
            .field("endpoint", &self.config.endpoint)
            .field("cache", &self.cache.stats())
            .field("scheduler", &self.scheduler.config())
            .finish()
    }
}

impl AppState {
    /// Wire up the production collaborators around a shared HTTP client.
    ///
    /// Error reports go to `config.telemetry_url` when set, otherwise to the
    /// local log.
    pub fn new(config: SearchConfig, http_client: reqwest::Client) -> Self {
        let sink: Arc<dyn TelemetrySink> = match config.telemetry_url {
            Some(ref url) => Arc::new(HttpTelemetrySink::new(http_client.clone(), url.clone())),
            None => Arc::new(LogSink),
        };
        Self::with_parts(config, Arc::new(ReqwestTransport::new(http_client)), sink)
    }

    /// Build state around caller-supplied collaborators.
    pub fn with_parts(
        config: SearchConfig,
        transport: Arc<dyn Transport>,
        sink: Arc<dyn TelemetrySink>,
    ) -> Self {
        let redactor = Redactor::new(config.api_key.iter());
        Self {
            cache: Arc::new(ResultCache::new(config.cache_max_entries, config.cache_ttl)),
            scheduler: Arc::new(Scheduler::new(config.rate.clone())),
            reporter: ErrorReporter::new(sink, redactor),
            transport,
            config,
        }
    }
}
