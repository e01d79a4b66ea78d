mod common;

use common::*;
use cse_search::config::CACHE_TTL;
use cse_search::scheduler::RateConfig;
use cse_search::search::{
    clear_cache, fetch_items, get_top_search_results, get_top_search_results_json, google_search,
    purge_expired_cache,
};
use cse_search::transport::TransportError;
use cse_search::{ErrorCategory, SearchConfig, SearchError};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_test::{assert_err, assert_ok};

fn setup(config: SearchConfig, transport: FakeTransport) -> (cse_search::AppState, Arc<FakeTransport>, Arc<RecordingSink>) {
    let transport = Arc::new(transport);
    let sink = Arc::new(RecordingSink::default());
    let state = state_with(config, transport.clone(), sink.clone());
    (state, transport, sink)
}

#[tokio::test(start_paused = true)]
async fn repeated_query_is_served_from_cache() {
    let (state, transport, _) = setup(online_config(), FakeTransport::echo());

    let first = assert_ok!(fetch_items(&state, "Rust", None).await);
    let second = assert_ok!(fetch_items(&state, "Rust", None).await);

    assert_eq!(first, second);
    assert_eq!(first[0].link.as_deref(), Some("https://Rust.example/"));
    assert_eq!(transport.calls(), 1);
    assert_eq!(state.scheduler.dispatched(), 1);
}

#[tokio::test(start_paused = true)]
async fn equivalent_queries_share_a_cache_entry() {
    let (state, transport, _) = setup(online_config(), FakeTransport::echo());

    assert_ok!(fetch_items(&state, "  Rust Async ", None).await);
    assert_ok!(fetch_items(&state, "rust async", None).await);
    assert_eq!(transport.calls(), 1);

    // A different result count is a different key.
    assert_ok!(fetch_items(&state, "rust async", Some(3)).await);
    assert_eq!(transport.calls(), 2);
    assert_eq!(state.cache.len(), 2);
}

#[tokio::test(start_paused = true)]
async fn result_count_is_clamped_in_the_provider_url() {
    let (state, transport, _) = setup(online_config(), FakeTransport::echo());

    assert_ok!(fetch_items(&state, "big", Some(50)).await);
    assert_ok!(fetch_items(&state, "zero", Some(0)).await);
    assert_ok!(fetch_items(&state, "negative", Some(-4)).await);

    let urls: Vec<String> = transport.requests().into_iter().map(|(u, _)| u).collect();
    assert!(urls[0].contains("&num=10&"));
    assert!(urls[1].contains("&num=1&"));
    assert!(!urls[2].contains("num="));
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_refetched() {
    let (state, transport, _) = setup(online_config(), FakeTransport::echo());

    assert_ok!(fetch_items(&state, "rust", None).await);
    tokio::time::advance(CACHE_TTL - Duration::from_millis(1)).await;
    assert_ok!(fetch_items(&state, "rust", None).await);
    assert_eq!(transport.calls(), 1);

    tokio::time::advance(Duration::from_millis(1)).await;
    assert_ok!(fetch_items(&state, "rust", None).await);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn least_recently_used_query_is_evicted_first() {
    let config = SearchConfig {
        cache_max_entries: 2,
        ..online_config()
    };
    let (state, transport, _) = setup(config, FakeTransport::echo());

    assert_ok!(fetch_items(&state, "a", None).await);
    assert_ok!(fetch_items(&state, "b", None).await);
    assert_ok!(fetch_items(&state, "a", None).await);
    assert_ok!(fetch_items(&state, "c", None).await);
    assert_eq!(transport.calls(), 3);

    // "a" was touched after "b", so "b" went.
    assert_ok!(fetch_items(&state, "a", None).await);
    assert_eq!(transport.calls(), 3);
    assert_ok!(fetch_items(&state, "b", None).await);
    assert_eq!(transport.calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn zero_capacity_disables_caching() {
    let config = SearchConfig {
        cache_max_entries: 0,
        ..online_config()
    };
    let (state, transport, _) = setup(config, FakeTransport::echo());

    assert_ok!(fetch_items(&state, "rust", None).await);
    assert_ok!(fetch_items(&state, "rust", None).await);
    assert_eq!(transport.calls(), 2);
    assert!(state.cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_query_fails_before_any_io() {
    let (state, transport, sink) = setup(online_config(), FakeTransport::echo());

    let err = assert_err!(fetch_items(&state, "   ", None).await);
    assert!(matches!(err, SearchError::Validation(_)));

    let long = "q".repeat(2049);
    let err = assert_err!(google_search(&state, &long).await);
    assert!(matches!(err, SearchError::Validation(_)));

    assert_eq!(transport.calls(), 0);
    assert_eq!(state.scheduler.dispatched(), 0);
    assert_eq!(state.cache.stats().misses, 0);
    settle().await;
    assert_eq!(
        sink.categories(),
        vec![ErrorCategory::ValidationError, ErrorCategory::ValidationError]
    );
}

#[tokio::test(start_paused = true)]
async fn validation_error_does_not_wait_for_a_slow_sink() {
    struct StalledSink;

    #[async_trait::async_trait]
    impl cse_search::reporter::TelemetrySink for StalledSink {
        async fn report(
            &self,
            _message: &str,
            _context: &cse_search::reporter::ErrorContext,
        ) -> anyhow::Result<bool> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(true)
        }
    }

    let transport = Arc::new(FakeTransport::echo());
    let state = cse_search::AppState::with_parts(online_config(), transport, Arc::new(StalledSink));

    let start = Instant::now();
    assert_err!(fetch_items(&state, " ", None).await);
    assert_err!(get_top_search_results_json(&state, &json!("rust")).await);
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn offline_mode_never_touches_the_network() {
    let (state, transport, sink) = setup(SearchConfig::offline(), FakeTransport::echo());

    let items = assert_ok!(fetch_items(&state, "rust", None).await);
    assert!(items.is_empty());
    let results = assert_ok!(google_search(&state, "rust").await);
    assert!(results.is_empty());

    assert_eq!(transport.calls(), 0);
    assert_eq!(state.scheduler.dispatched(), 0);
    assert!(sink.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn offline_mode_still_validates() {
    let (state, _, sink) = setup(SearchConfig::offline(), FakeTransport::echo());
    assert_err!(fetch_items(&state, "", None).await);
    settle().await;
    assert_eq!(sink.categories(), vec![ErrorCategory::ValidationError]);
}

#[tokio::test(start_paused = true)]
async fn provider_failure_degrades_to_empty_and_is_reported() {
    let transport = FakeTransport::new(|_| Err(TransportError::status(503, "backend unavailable")));
    let (state, transport, sink) = setup(online_config(), transport);

    let items = assert_ok!(fetch_items(&state, "rust", None).await);
    assert!(items.is_empty());

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    let (_, context) = &reports[0];
    assert_eq!(context.category, ErrorCategory::ApiError);
    assert_eq!(context.details["status"], json!(503));
    assert_eq!(context.details["body"], json!("backend unavailable"));
    assert_eq!(context.details["query"], json!("rust"));

    // Failures are not cached.
    assert_ok!(fetch_items(&state, "rust", None).await);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn network_error_is_reported_without_status() {
    let transport = FakeTransport::new(|_| Err(TransportError::network("connection reset")));
    let (state, _, sink) = setup(online_config(), transport);

    let results = assert_ok!(google_search(&state, "rust").await);
    assert!(results.is_empty());

    let (message, context) = &sink.reports()[0];
    assert!(message.contains("connection reset"));
    assert_eq!(context.details["status"], json!(null));
    assert_eq!(context.error_message, "connection reset");
}

#[tokio::test(start_paused = true)]
async fn malformed_body_degrades_to_empty() {
    let transport = FakeTransport::new(|_| ok_body("<html>not json</html>"));
    let (state, _, sink) = setup(online_config(), transport);

    let items = assert_ok!(fetch_items(&state, "rust", None).await);
    assert!(items.is_empty());
    assert_eq!(sink.categories(), vec![ErrorCategory::ApiError]);
    assert_eq!(sink.reports()[0].1.details["body"], json!("<html>not json</html>"));
}

#[tokio::test(start_paused = true)]
async fn empty_results_are_not_cached() {
    let transport = FakeTransport::new(|_| ok_body("{}"));
    let (state, transport, sink) = setup(online_config(), transport);

    assert!(assert_ok!(fetch_items(&state, "nothing", None).await).is_empty());
    assert!(assert_ok!(fetch_items(&state, "nothing", None).await).is_empty());
    assert_eq!(transport.calls(), 2);
    assert!(state.cache.is_empty());
    assert!(sink.reports().is_empty());
}

#[tokio::test(start_paused = true)]
async fn api_key_never_reaches_the_sink() {
    let transport = FakeTransport::new(|url| {
        Err(TransportError::status(400, format!("bad request for {url}")))
    });
    let (state, transport, sink) = setup(online_config(), transport);

    assert_ok!(fetch_items(&state, "rust", None).await);

    let (url, _) = &transport.requests()[0];
    assert!(url.contains(API_KEY_ENCODED));

    let (message, context) = &sink.reports()[0];
    let serialized = serde_json::to_string(context).unwrap();
    for text in [message.as_str(), serialized.as_str()] {
        assert!(!text.contains(API_KEY), "raw key leaked: {text}");
        assert!(!text.contains(API_KEY_ENCODED), "encoded key leaked: {text}");
    }
    assert!(serialized.contains("[REDACTED]"));
}

#[tokio::test(start_paused = true)]
async fn sink_failure_does_not_change_the_outcome() {
    struct BrokenSink;

    #[async_trait::async_trait]
    impl cse_search::reporter::TelemetrySink for BrokenSink {
        async fn report(
            &self,
            _message: &str,
            _context: &cse_search::reporter::ErrorContext,
        ) -> anyhow::Result<bool> {
            anyhow::bail!("collector unreachable")
        }
    }

    let transport = Arc::new(FakeTransport::new(|_| Err(TransportError::network("down"))));
    let state = cse_search::AppState::with_parts(online_config(), transport, Arc::new(BrokenSink));

    let items = assert_ok!(fetch_items(&state, "rust", None).await);
    assert!(items.is_empty());
    let err = assert_err!(fetch_items(&state, "", None).await);
    assert!(matches!(err, SearchError::Validation(_)));
}

#[tokio::test(start_paused = true)]
async fn request_carries_headers_and_timeout() {
    let config = SearchConfig {
        referer: Some("https://app.example/".into()),
        ..online_config()
    };
    let (state, transport, _) = setup(config, FakeTransport::echo());

    assert_ok!(fetch_items(&state, "rust", None).await);

    let (url, options) = &transport.requests()[0];
    assert!(url.starts_with("https://www.googleapis.com/customsearch/v1?"));
    assert!(url.contains("cx=engine-1"));
    assert!(url.contains("&q=rust&"));
    assert!(url.ends_with("&fields=items(title%2Csnippet%2Clink)"));
    assert_eq!(options.timeout, Duration::from_secs(10));
    assert_eq!(options.headers["Referer"], "https://app.example/");
    assert_eq!(options.headers["Accept"], "application/json");
}

#[tokio::test(start_paused = true)]
async fn google_search_fills_missing_fields_with_empty_strings() {
    let transport = FakeTransport::new(|_| {
        ok_body(r#"{"items":[{"title":"Only a title"},{"link":"https://x.example/","snippet":"s"}]}"#)
    });
    let (state, _, _) = setup(online_config(), transport);

    let results = assert_ok!(google_search(&state, "rust").await);
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].title, "Only a title");
    assert_eq!(results[0].snippet, "");
    assert_eq!(results[0].link, "");
    assert_eq!(results[1].title, "");
    assert_eq!(results[1].link, "https://x.example/");
}

#[tokio::test(start_paused = true)]
async fn top_results_dedupe_and_keep_input_order() {
    let (state, transport, _) = setup(online_config(), FakeTransport::echo());

    let links = get_top_search_results(&state, ["A", "b", "A", " "]).await;

    assert_eq!(links, vec!["https://A.example/", "https://b.example/"]);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn top_results_skip_failed_and_linkless_queries() {
    let transport = FakeTransport::new(|url| match query_param(url).as_str() {
        "broken" => Err(TransportError::status(500, "")),
        "linkless" => ok_body(r#"{"items":[{"title":"no link"}]}"#),
        "empty" => ok_body(r#"{"items":[]}"#),
        q => ok_body(&items_body(&[&format!("https://{q}.example/")])),
    });
    let (state, _, sink) = setup(online_config(), transport);

    let links =
        get_top_search_results(&state, ["first", "broken", "linkless", "empty", "last"]).await;

    assert_eq!(links, vec!["https://first.example/", "https://last.example/"]);
    assert_eq!(sink.categories(), vec![ErrorCategory::ApiError]);
}

#[tokio::test(start_paused = true)]
async fn top_results_with_no_usable_queries_is_empty() {
    let (state, transport, _) = setup(online_config(), FakeTransport::echo());

    let none: [&str; 0] = [];
    assert!(get_top_search_results(&state, none).await.is_empty());
    assert!(get_top_search_results(&state, ["", "  "]).await.is_empty());
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn top_results_respect_the_concurrency_ceiling() {
    let config = SearchConfig {
        rate: RateConfig {
            max_concurrent: 3,
            ..fast_rate()
        },
        ..online_config()
    };
    let transport = FakeTransport::echo().with_delay(Duration::from_millis(500));
    let (state, transport, _) = setup(config, transport);

    let queries: Vec<String> = (0..9).map(|i| format!("q{i}")).collect();
    let links = get_top_search_results(&state, &queries).await;

    assert_eq!(links.len(), 9);
    assert_eq!(links[0], "https://q0.example/");
    assert_eq!(links[8], "https://q8.example/");
    assert_eq!(transport.peak(), 3);
    assert_eq!(state.scheduler.in_flight(), 0);
}

#[tokio::test(start_paused = true)]
async fn exhausted_token_budget_delays_dispatch() {
    let config = SearchConfig {
        rate: RateConfig {
            tokens_per_window: 2,
            window: Duration::from_secs(60),
            ..fast_rate()
        },
        ..online_config()
    };
    let (state, transport, _) = setup(config, FakeTransport::echo());

    let start = Instant::now();
    let links = get_top_search_results(&state, ["one", "two", "three"]).await;

    assert_eq!(links.len(), 3);
    assert_eq!(transport.calls(), 3);
    assert!(start.elapsed() >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn top_results_json_rejects_non_arrays() {
    let (state, transport, sink) = setup(online_config(), FakeTransport::echo());

    for input in [json!("rust"), json!(null), json!({"q": "rust"}), json!(3)] {
        let err = assert_err!(get_top_search_results_json(&state, &input).await);
        assert!(matches!(err, SearchError::Validation(_)));
    }
    assert_eq!(transport.calls(), 0);
    settle().await;
    assert_eq!(sink.reports().len(), 4);
    assert_eq!(sink.reports()[0].1.details["input_type"], json!("string"));
}

#[tokio::test(start_paused = true)]
async fn top_results_json_drops_non_string_entries() {
    let (state, _, _) = setup(online_config(), FakeTransport::echo());

    let input = json!(["x", 1, null, "y", ["z"], "x"]);
    let links = assert_ok!(get_top_search_results_json(&state, &input).await);
    assert_eq!(links, vec!["https://x.example/", "https://y.example/"]);
}

#[tokio::test(start_paused = true)]
async fn clear_cache_forces_refetch() {
    let (state, transport, _) = setup(online_config(), FakeTransport::echo());

    assert_ok!(fetch_items(&state, "rust", None).await);
    assert!(clear_cache(&state).await);
    assert!(state.cache.is_empty());

    assert_ok!(fetch_items(&state, "rust", None).await);
    assert_eq!(transport.calls(), 2);

    // Clearing an empty cache still succeeds.
    assert!(clear_cache(&state).await);
    assert!(clear_cache(&state).await);
}

#[tokio::test(start_paused = true)]
async fn purge_reports_whether_anything_expired() {
    let (state, _, _) = setup(online_config(), FakeTransport::echo());

    assert_ok!(fetch_items(&state, "old", None).await);
    assert!(!purge_expired_cache(&state).await);

    tokio::time::advance(Duration::from_secs(200)).await;
    assert_ok!(fetch_items(&state, "new", None).await);
    tokio::time::advance(Duration::from_secs(100)).await;

    assert!(purge_expired_cache(&state).await);
    assert_eq!(state.cache.keys(), vec!["new".to_string()]);
    assert!(!purge_expired_cache(&state).await);
}
