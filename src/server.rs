use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::{search, types::*, AppState, SearchError};

type ApiError = (StatusCode, Json<ErrorResponse>);

/// HTTP routes over the library operations.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/search", post(search_handler))
        .route("/items", post(items_handler))
        .route("/top", post(top_results_handler))
        .route("/cache/clear", post(clear_cache_handler))
        .route("/cache/purge", post(purge_cache_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn error_response(e: SearchError) -> ApiError {
    let status = match e {
        SearchError::Validation(_) => StatusCode::BAD_REQUEST,
        _ => {
            error!("request failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (
        status,
        Json(ErrorResponse {
            error: e.to_string(),
        }),
    )
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "cse-search",
        "version": env!("CARGO_PKG_VERSION"),
        "offline": state.config.offline,
        "cache": state.cache.stats(),
        "in_flight": state.scheduler.in_flight(),
    }))
}

async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    let query = search::query_from_json(&state, &request.query).map_err(error_response)?;
    let results = search::google_search(&state, query)
        .await
        .map_err(error_response)?;
    Ok(Json(SearchResponse { results }))
}

async fn items_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<ItemsRequest>,
) -> Result<Json<ItemsResponse>, ApiError> {
    let query = search::query_from_json(&state, &request.query).map_err(error_response)?;
    let num = search::result_count_from_json(&request.num);
    let items = search::fetch_items(&state, query, num)
        .await
        .map_err(error_response)?;
    Ok(Json(ItemsResponse { items }))
}

async fn top_results_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TopResultsRequest>,
) -> Result<Json<TopResultsResponse>, ApiError> {
    let links = search::get_top_search_results_json(&state, &request.queries)
        .await
        .map_err(error_response)?;
    info!("resolved {} top links", links.len());
    Ok(Json(TopResultsResponse { links }))
}

async fn clear_cache_handler(State(state): State<Arc<AppState>>) -> Json<CacheOpResponse> {
    Json(CacheOpResponse {
        ok: search::clear_cache(&state).await,
    })
}

async fn purge_cache_handler(State(state): State<Arc<AppState>>) -> Json<CacheOpResponse> {
    Json(CacheOpResponse {
        ok: search::purge_expired_cache(&state).await,
    })
}
