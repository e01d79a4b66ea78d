use std::env;
use std::sync::Arc;
use tracing::{error, info};

use cse_search::reporter::{Details, ErrorReporter};
use cse_search::{cache, logging, server, AppState, SearchConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = match SearchConfig::from_env().and_then(|c| c.validate().map(|_| c)) {
        Ok(config) => config,
        Err(e) => {
            logging::init(&SearchConfig::default());
            ErrorReporter::default()
                .report_config_error(&e, "load configuration", Details::new())
                .await;
            error!("{}", e);
            return Err(e.into());
        }
    };
    logging::init(&config);

    let bind = env::var("SEARCH_BIND").unwrap_or_else(|_| "0.0.0.0:5000".to_string());
    info!("Starting cse-search");
    info!("Endpoint: {}", config.endpoint);
    if config.offline {
        info!("Offline mode: provider calls are disabled");
    }

    // Per-request timeouts are set by the transport
    let http_client = reqwest::Client::builder().gzip(true).build()?;

    let state = Arc::new(AppState::new(config, http_client));
    let sweeper = cache::spawn_sweeper(state.cache.clone(), state.cache.ttl());

    let app = server::router(state);
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("cse-search listening on http://{}", bind);

    axum::serve(listener, app).await?;

    sweeper.abort();
    Ok(())
}
