//! The request pipeline: validate, look up the cache, schedule the provider
//! call, populate the cache, shape the result.
//!
//! Only input validation raises. Provider, decoding and cache failures are
//! reported and degrade to an empty result.

use crate::error::{ErrorCategory, Result, SearchError};
use crate::key::{clamp_result_count, normalize};
use crate::reporter::Details;
use crate::transport::{encode_component, RequestOptions, TransportError, TransportResponse};
use crate::types::*;
use crate::{AppState, SearchConfig};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

/// Longest accepted query, in characters.
pub const MAX_QUERY_CHARS: usize = 2048;
/// Restricts the provider response to the fields we read.
pub const RESULT_FIELDS: &str = "items(title,snippet,link)";
/// Body substituted for the provider response in offline mode.
pub const OFFLINE_BODY: &str = r#"{"items":[]}"#;
const USER_AGENT: &str = concat!("cse-search/", env!("CARGO_PKG_VERSION"));
const MAX_REPORTED_BODY: usize = 500;

/// Check that `query` is non-blank and not longer than [`MAX_QUERY_CHARS`].
pub fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(SearchError::Validation(
            "query must be a non-empty string".into(),
        ));
    }
    let chars = query.chars().count();
    if chars > MAX_QUERY_CHARS {
        return Err(SearchError::Validation(format!(
            "query must be at most {MAX_QUERY_CHARS} characters (got {chars})"
        )));
    }
    Ok(())
}

/// Provider URL for a query. Every parameter value is percent-encoded.
pub fn build_url(config: &SearchConfig, query: &str, num: Option<u8>) -> String {
    let mut url = format!(
        "{}?key={}&cx={}&q={}",
        config.endpoint,
        encode_component(config.api_key.as_deref().unwrap_or_default()),
        encode_component(config.search_engine_id.as_deref().unwrap_or_default()),
        encode_component(query)
    );
    if let Some(n) = num {
        url.push_str(&format!("&num={n}"));
    }
    url.push_str("&fields=");
    url.push_str(&encode_component(RESULT_FIELDS));
    url
}

fn request_options(config: &SearchConfig) -> RequestOptions {
    let mut headers = HashMap::new();
    headers.insert("Accept".to_string(), "application/json".to_string());
    headers.insert("User-Agent".to_string(), USER_AGENT.to_string());
    if let Some(ref referer) = config.referer {
        headers.insert("Referer".to_string(), referer.clone());
    }
    RequestOptions {
        timeout: config.request_timeout,
        headers,
    }
}

fn api_details(query: &str, url: &str, result_count: Option<u8>) -> Details {
    let mut details = Details::new();
    details.insert("query".into(), json!(query));
    details.insert("url".into(), json!(url));
    details.insert("result_count".into(), json!(result_count));
    details
}

/// Raw provider items for a query.
///
/// Returns a validation error for a blank or oversized query before any
/// cache, scheduler or network activity. Every other failure is reported
/// and yields an empty list.
pub async fn fetch_items(
    state: &AppState,
    query: &str,
    result_count: Option<i64>,
) -> Result<Vec<ResultItem>> {
    if let Err(err) = validate_query(query) {
        let mut details = Details::new();
        details.insert("query_length".into(), json!(query.chars().count()));
        report_invalid(state, &err, "fetch items", details);
        return Err(err);
    }

    let key = normalize(query, result_count);
    if let Some(cached) = cache_get(state, &key).await {
        debug!("search cache hit for query");
        return Ok(cached);
    }

    let num = clamp_result_count(result_count);
    let body = if state.config.offline {
        debug!("offline mode, substituting canned provider response");
        OFFLINE_BODY.to_string()
    } else {
        match call_provider(state, query.trim(), num).await {
            Some(resp) => resp.body,
            None => return Ok(Vec::new()),
        }
    };

    let parsed: CseResponse = match serde_json::from_str(&body) {
        Ok(parsed) => parsed,
        Err(e) => {
            let mut details = Details::new();
            details.insert("query".into(), json!(query));
            details.insert("body".into(), json!(truncate(&body, MAX_REPORTED_BODY)));
            state
                .reporter
                .report_api_error(&e, "decode provider response", details)
                .await;
            return Ok(Vec::new());
        }
    };

    let items = parsed.items.unwrap_or_default();
    info!("provider returned {} items", items.len());
    if !items.is_empty() {
        cache_set(state, key, items.clone()).await;
    }
    Ok(items)
}

/// Report a caller input error without holding up the caller.
fn report_invalid(state: &AppState, err: &SearchError, operation: &str, details: Details) {
    let _ = state.reporter.spawn_report(
        ErrorCategory::ValidationError,
        err,
        operation,
        details,
    );
}

/// Schedule one provider request. `None` means the failure was reported.
async fn call_provider(
    state: &AppState,
    query: &str,
    num: Option<u8>,
) -> Option<TransportResponse> {
    let url = build_url(&state.config, query, num);
    let options = request_options(&state.config);
    debug!("provider URL: {}", state.reporter.redactor().redact(&url));

    let transport = &state.transport;
    let outcome = state
        .scheduler
        .schedule(|| async { Ok::<_, SearchError>(transport.get(&url, &options).await) })
        .await;

    match outcome {
        Ok(Ok(resp)) => Some(resp),
        Ok(Err(err)) => {
            report_transport_error(state, &err, query, &url, num).await;
            None
        }
        Err(err) => {
            state
                .reporter
                .report_api_error(&err, "schedule provider request", api_details(query, &url, num))
                .await;
            None
        }
    }
}

async fn report_transport_error(
    state: &AppState,
    err: &TransportError,
    query: &str,
    url: &str,
    num: Option<u8>,
) {
    let mut details = api_details(query, url, num);
    details.insert("status".into(), json!(err.status));
    if let Some(ref body) = err.body {
        details.insert("body".into(), json!(truncate(body, MAX_REPORTED_BODY)));
    }
    state
        .reporter
        .report_api_error(err, "fetch provider results", details)
        .await;
}

async fn cache_get(state: &AppState, key: &str) -> Option<Vec<ResultItem>> {
    match state.cache.get(key) {
        Ok(hit) => hit,
        Err(err) => {
            let mut details = Details::new();
            details.insert("key".into(), json!(key));
            state
                .reporter
                .report_cache_error(&err, "cache lookup", details)
                .await;
            None
        }
    }
}

async fn cache_set(state: &AppState, key: String, items: Vec<ResultItem>) {
    if let Err(err) = state.cache.set(key.clone(), items) {
        let mut details = Details::new();
        details.insert("key".into(), json!(key));
        state
            .reporter
            .report_cache_error(&err, "cache store", details)
            .await;
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

/// Search results in the three-field caller shape.
pub async fn google_search(state: &AppState, query: &str) -> Result<Vec<SearchResult>> {
    let items = fetch_items(state, query, None).await?;
    Ok(items.into_iter().map(SearchResult::from).collect())
}

/// First link for each distinct query, in input order.
///
/// Blank entries are dropped, then exact duplicates. Every remaining query is
/// fetched at once; the scheduler alone decides how many hit the network.
/// Queries with no result, or whose first item has no link, are omitted.
pub async fn get_top_search_results<I, S>(state: &AppState, queries: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let terms: Vec<String> = queries
        .into_iter()
        .map(|q| q.as_ref().to_string())
        .filter(|q| !q.trim().is_empty())
        .filter(|q| seen.insert(q.clone()))
        .collect();
    if terms.is_empty() {
        return Vec::new();
    }

    let fetches = terms.iter().map(|term| async move {
        match fetch_items(state, term, None).await {
            Ok(items) => items.into_iter().next().and_then(|item| item.link),
            Err(e) => {
                debug!("skipping query: {}", e);
                None
            }
        }
    });
    join_all(fetches).await.into_iter().flatten().collect()
}

/// [`get_top_search_results`] for untyped input.
///
/// Anything other than an array is a validation error; non-string elements
/// are dropped like blank ones.
pub async fn get_top_search_results_json(state: &AppState, queries: &Value) -> Result<Vec<String>> {
    let Some(list) = queries.as_array() else {
        let err = SearchError::Validation("queries must be an array of strings".into());
        report_invalid(state, &err, "top search results", type_details(queries));
        return Err(err);
    };
    let terms = list.iter().filter_map(Value::as_str);
    Ok(get_top_search_results(state, terms).await)
}

/// Borrow a query out of untyped input.
///
/// Anything other than a string is a validation error; blank and oversized
/// strings are left to [`validate_query`].
pub fn query_from_json<'a>(state: &AppState, value: &'a Value) -> Result<&'a str> {
    match value.as_str() {
        Some(query) => Ok(query),
        None => {
            let err = SearchError::Validation("query must be a non-empty string".into());
            report_invalid(state, &err, "fetch items", type_details(value));
            Err(err)
        }
    }
}

/// Result count from untyped input.
///
/// Integers, and floats with no fractional part, are accepted. Anything else
/// counts as not provided.
pub fn result_count_from_json(value: &Value) -> Option<i64> {
    let Value::Number(n) = value else {
        return None;
    };
    n.as_i64().or_else(|| {
        n.as_f64()
            .filter(|f| f.is_finite() && f.fract() == 0.0)
            .map(|f| f as i64)
    })
}

fn type_details(value: &Value) -> Details {
    let mut details = Details::new();
    details.insert("input_type".into(), json!(json_type_name(value)));
    details
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Drop every cached result. Always succeeds.
pub async fn clear_cache(state: &AppState) -> bool {
    state.cache.clear();
    info!("search cache cleared");
    true
}

/// Remove expired cache entries. Returns whether anything was removed.
pub async fn purge_expired_cache(state: &AppState) -> bool {
    state.cache.purge_expired()
}
