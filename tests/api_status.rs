// tests/api_status.rs
//
// Status surface exercised through the Router directly (tower oneshot),
// no sockets involved.

use axum::{
    body::{self, Body},
    Router,
};
use http::{Request, StatusCode};
use serde_json::Value as Json;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt as _;

use blueflag::api::{self, AppState};
use blueflag::config::ScoringConfig;
use blueflag::ingest::providers::MockSource;
use blueflag::ingest::types::RawItem;
use blueflag::ingest::ChannelPoller;
use blueflag::metrics::Metrics;
use blueflag::publish::{MockPublisher, PublishDispatcher};
use blueflag::retry::RetryPolicy;
use blueflag::scoring::ScoringEngine;
use blueflag::store::{MemoryDedupStore, QuotaLedger, WindowPolicy};
use blueflag::{Channel, KeywordTable, Scheduler, SchedulerSettings};

const BODY_LIMIT: usize = 1024 * 1024;

fn scheduler(source: Arc<MockSource>) -> Arc<Scheduler> {
    let ledger = Arc::new(QuotaLedger::in_memory(50, WindowPolicy::daily_at_hour_utc(8)));
    let poller = ChannelPoller::new(source, ledger, 1);
    let dispatcher = PublishDispatcher::new(
        Arc::new(MockPublisher::new()),
        Arc::new(MemoryDedupStore::new()),
        RetryPolicy::new(1, 0, 0),
        "motorsport",
    );
    let mut settings = SchedulerSettings::default();
    settings.post_spacing = Duration::ZERO;
    Arc::new(Scheduler::new(
        vec![Channel::new("UC1", "Formula 1", "F1")],
        poller,
        ScoringEngine::new(&KeywordTable::default(), ScoringConfig::default()),
        dispatcher,
        settings,
    ))
}

fn app(scheduler: Arc<Scheduler>, with_metrics: bool) -> Router {
    let metrics = with_metrics.then(|| Metrics::detached().handle);
    api::router(AppState { scheduler, metrics })
}

async fn send(app: Router, method: &str, uri: &str) -> (StatusCode, String) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request");
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    (status, String::from_utf8(bytes.to_vec()).expect("utf8"))
}

#[tokio::test]
async fn health_returns_ok() {
    let (status, body) = send(app(scheduler(Arc::new(MockSource::new())), false), "GET", "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.trim(), "OK");
}

#[tokio::test]
async fn status_reports_state_quota_and_last_cycle() {
    let source = Arc::new(MockSource::new());
    source.set_items("UC1", vec![RawItem::new("v1", "UC1", "Race highlights")]);
    let sched = scheduler(source);

    let (status, body) = send(app(sched.clone(), false), "GET", "/status").await;
    assert_eq!(status, StatusCode::OK);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["state"], "idle");
    assert_eq!(v["in_cycle"], false);
    assert_eq!(v["channels"], 1);
    assert_eq!(v["quota"]["ceiling"], 50);
    assert!(v.get("last_report").is_none());

    sched.run_cycle(&CancellationToken::new()).await.unwrap();

    let (_, body) = send(app(sched, false), "GET", "/status").await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["quota"]["consumed"], 1);
    assert_eq!(v["last_report"]["channels_polled"], 1);
    assert_eq!(v["last_report"]["candidates"], 1);
    // Default keyword table has no hits, so nothing crosses the threshold.
    assert_eq!(v["published_records"], 0);
}

#[tokio::test]
async fn cycle_trigger_is_accepted_when_idle() {
    let (status, body) = send(app(scheduler(Arc::new(MockSource::new())), false), "POST", "/cycle").await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["accepted"], true);
}

#[tokio::test]
async fn cycle_trigger_conflicts_while_a_cycle_runs() {
    let source = Arc::new(MockSource::new());
    source.set_delay(Duration::from_millis(300));
    let sched = scheduler(source);

    let running = sched.clone();
    let task = tokio::spawn(async move {
        let token = CancellationToken::new();
        running.run_cycle(&token).await
    });
    for _ in 0..100 {
        if sched.is_in_cycle() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert!(sched.is_in_cycle());

    let (status, body) = send(app(sched.clone(), false), "POST", "/cycle").await;
    assert_eq!(status, StatusCode::CONFLICT);
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["reason"], "cycle_in_progress");

    let (_, body) = send(app(sched, false), "GET", "/status").await;
    let v: Json = serde_json::from_str(&body).unwrap();
    assert_eq!(v["state"], "scanning");

    task.await.unwrap().unwrap();
}

#[tokio::test]
async fn metrics_endpoint_depends_on_recorder() {
    let sched = scheduler(Arc::new(MockSource::new()));

    let (status, _) = send(app(sched.clone(), false), "GET", "/metrics").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(app(sched, true), "GET", "/metrics").await;
    assert_eq!(status, StatusCode::OK);
}
