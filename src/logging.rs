//! Structured logging setup over `tracing-subscriber`.

use crate::config::SearchConfig;
use tracing_subscriber::EnvFilter;

/// Filter directive derived from the configured verbosity.
///
/// The debug flag turns on trace output for this crate on top of the base
/// level.
pub fn filter_directive(config: &SearchConfig) -> String {
    let base = config.log_level.directive();
    if config.debug {
        format!("{base},cse_search=trace")
    } else {
        base.to_string()
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` wins when set. Calling this more than once is harmless.
pub fn init(config: &SearchConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(config)));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
