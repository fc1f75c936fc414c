// tests/status_api.rs
//
// Status surface exercised in-process via tower::ServiceExt::oneshot.

use std::sync::Arc;

use axum::body::{self, Body};
use axum::Router;
use http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{json, Value};
use tower::ServiceExt as _;

use news_relay::api::{create_router, AppState};
use news_relay::config::{AppConfig, SourceConfig, SourceKind};
use news_relay::ingest::CycleOutcome;
use news_relay::metrics::Metrics;
use news_relay::resilience::{ErrorHandler, Severity};
use news_relay::telemetry::Telemetry;

const BODY_LIMIT: usize = 1024 * 1024;

fn config() -> AppConfig {
    let mut disabled = SourceConfig::page("Steam", "https://s.test", ".news", SourceKind::Static);
    disabled.enabled = false;
    AppConfig {
        sources: vec![
            SourceConfig::feed("A", "https://a.test/rss"),
            SourceConfig::feed("B", "https://b.test/rss"),
            SourceConfig::page("LoL", "https://l.test", "a.card", SourceKind::Dynamic),
            disabled,
        ],
        ..AppConfig::default()
    }
    .finalize()
}

async fn get(app: Router, uri: &str) -> (StatusCode, String) {
    let resp = app
        .oneshot(Request::get(uri).body(Body::empty()).unwrap())
        .await
        .expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

#[tokio::test]
async fn health_is_plain_ok() {
    let state = AppState::new(
        Arc::new(config()),
        Arc::new(ErrorHandler::new()),
        Arc::new(Telemetry::new()),
    );
    let (status, body) = get(create_router(state, None), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn status_reports_sources_errors_and_last_cycle() {
    let errors = Arc::new(ErrorHandler::new());
    let telemetry = Arc::new(Telemetry::new());
    let state = AppState::new(Arc::new(config()), errors.clone(), telemetry.clone());

    errors
        .handle_error(&anyhow::anyhow!("feed down"), "feed_fetch", Severity::Low, Value::Null)
        .await;
    let _ = telemetry
        .measure("feed_fetch", Value::Null, async { Ok::<_, anyhow::Error>(()) })
        .await;
    state.record_cycle(&CycleOutcome {
        fetched: 12,
        after_dedup: 9,
        kept: 4,
        ..CycleOutcome::default()
    });

    let (status, body) = get(create_router(state, None), "/status").await;
    assert_eq!(status, StatusCode::OK);
    let v: Value = serde_json::from_str(&body).unwrap();

    assert_eq!(
        v["sources"],
        json!({ "total": 4, "enabled": 3, "structured": 2, "static": 0, "dynamic": 1 })
    );
    assert_eq!(v["filter"]["min_relevance_score"], json!(10));
    assert_eq!(v["interval_minutes"], json!(60));
    assert_eq!(v["last_cycle"]["fetched"], json!(12));
    assert_eq!(v["last_cycle"]["kept"], json!(4));
    assert_eq!(v["errors"]["total_errors"], json!(1));
    assert_eq!(v["errors"]["error_counts"]["feed_fetch:Error"], json!(1));
    assert_eq!(v["elevated_error_rate"], json!(false));
    assert_eq!(v["operations"]["feed_fetch"]["count"], json!(1));
    assert!(v["system"]["resident_memory_bytes"].is_u64());
}

#[tokio::test]
async fn metrics_route_is_mounted_when_given() {
    let state = AppState::new(
        Arc::new(config()),
        Arc::new(ErrorHandler::new()),
        Arc::new(Telemetry::new()),
    );
    let (status, _) = get(create_router(state.clone(), None), "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(create_router(state.clone(), Some(&Metrics::detached())), "/metrics").await;
    assert_eq!(status, StatusCode::OK);

    let recorder = PrometheusBuilder::new().build_recorder();
    let m = Metrics {
        handle: recorder.handle(),
    };
    metrics::with_local_recorder(&recorder, || {
        metrics::counter!("delivery_sent_total").increment(2);
    });

    let (status, body) = get(create_router(state, Some(&m)), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("delivery_sent_total 2"), "{body}");
}

// The only test in this binary that installs the global recorder.
#[tokio::test]
async fn installed_recorder_sees_crate_series() {
    let m = Metrics::init(300).unwrap();
    let errors = Arc::new(ErrorHandler::new());
    errors
        .handle_error(&anyhow::anyhow!("feed down"), "feed_fetch", Severity::Medium, Value::Null)
        .await;
    metrics::counter!("delivery_sent_total").increment(3);

    let state = AppState::new(Arc::new(config()), errors, Arc::new(Telemetry::new()));
    let (status, body) = get(create_router(state, Some(&m)), "/metrics").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("resilience_cache_ttl_secs 300"), "{body}");
    assert!(body.contains("delivery_sent_total 3"), "{body}");
    assert!(body.contains("resilience_errors_total"), "{body}");
}
