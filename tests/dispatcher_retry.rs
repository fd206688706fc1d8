// tests/dispatcher_retry.rs
//
// Publish dispatcher: retries transient failures, never retries a rejection,
// and writes the dedup record only after the feed confirmed the post.

use blueflag::ingest::candidate_from_raw;
use blueflag::ingest::types::{Candidate, RawItem};
use blueflag::publish::{FeedPost, MockPublisher, PostReference, PublishDispatcher, PublishOutcome};
use blueflag::retry::RetryPolicy;
use blueflag::scoring::{Decision, ScoreResult};
use blueflag::store::{DedupStore, MemoryDedupStore};
use blueflag::{PipelineError, ReasonCode};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn accepted() -> ScoreResult {
    ScoreResult {
        score: 80,
        decision: Decision::Accept,
        tag: "f1".into(),
        reason: None,
        matched: vec![],
    }
}

fn item(id: &str) -> Candidate {
    candidate_from_raw(RawItem::new(id, "UC1", "Qualifying highlights"))
}

fn dispatcher(publisher: Arc<MockPublisher>, store: Arc<MemoryDedupStore>) -> PublishDispatcher {
    PublishDispatcher::new(publisher, store, RetryPolicy::new(3, 2, 10), "motorsport")
        .with_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn two_failures_then_success_publishes_once() {
    let publisher = Arc::new(MockPublisher::new().fail_times(2));
    let store = Arc::new(MemoryDedupStore::new());
    let d = dispatcher(publisher.clone(), store.clone());
    let cancel = CancellationToken::new();

    let out = d.publish(&item("vid-1"), &accepted(), &cancel).await.unwrap();
    assert!(matches!(out, PublishOutcome::Published(_)));
    assert_eq!(publisher.call_count(), 3);
    assert_eq!(store.records().len(), 1);
    assert_eq!(store.records()[0].item_id, "vid-1");

    // Seen again later in the cycle (or the next one): no further calls.
    let again = d.publish(&item("vid-1"), &accepted(), &cancel).await.unwrap();
    assert_eq!(again, PublishOutcome::AlreadyPublished);
    assert_eq!(publisher.call_count(), 3);
}

#[tokio::test]
async fn rejection_is_not_retried() {
    let publisher = Arc::new(MockPublisher::new());
    publisher.push_failure(PipelineError::PublishRejected("duplicate url".into()));
    let store = Arc::new(MemoryDedupStore::new());
    let d = dispatcher(publisher.clone(), store.clone());

    let out = d
        .publish(&item("vid-2"), &accepted(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(
        out,
        PublishOutcome::Dropped { attempts: 1, reason: ReasonCode::PublishRejected, .. }
    ));
    assert_eq!(publisher.call_count(), 1);
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn exhausted_retries_leave_no_record() {
    let publisher = Arc::new(MockPublisher::new().fail_times(5));
    let store = Arc::new(MemoryDedupStore::new());
    let d = dispatcher(publisher.clone(), store.clone());

    let out = d
        .publish(&item("vid-3"), &accepted(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(
        out,
        PublishOutcome::Dropped { attempts: 3, reason: ReasonCode::RetriesExhausted, .. }
    ));
    assert_eq!(publisher.call_count(), 3);
    assert!(!store.contains("vid-3").unwrap());
}

#[tokio::test]
async fn untrusted_store_stops_before_publishing() {
    let publisher = Arc::new(MockPublisher::new());
    let store = Arc::new(MemoryDedupStore::new());
    store.set_available(false);
    let d = dispatcher(publisher.clone(), store);

    let err = d
        .publish(&item("vid-4"), &accepted(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(err.is_fatal());
    assert_eq!(publisher.call_count(), 0);
}

#[tokio::test]
async fn concurrent_publishes_of_one_item_reach_the_feed_once() {
    let publisher = Arc::new(MockPublisher::new());
    let store = Arc::new(MemoryDedupStore::new());
    let d = dispatcher(publisher.clone(), store.clone());
    let cancel = CancellationToken::new();
    let c = item("vid-5");
    let r = accepted();

    let (a, b) = tokio::join!(d.publish(&c, &r, &cancel), d.publish(&c, &r, &cancel));
    let outcomes = [a.unwrap(), b.unwrap()];
    let published = outcomes
        .iter()
        .filter(|o| matches!(o, PublishOutcome::Published(_)))
        .count();

    assert_eq!(published, 1);
    assert_eq!(publisher.call_count(), 1);
    assert_eq!(store.len().unwrap(), 1);
}

#[tokio::test]
async fn cancellation_during_backoff_abandons_the_item() {
    let publisher = Arc::new(MockPublisher::new().fail_times(50));
    let store = Arc::new(MemoryDedupStore::new());
    let d = PublishDispatcher::new(publisher.clone(), store.clone(), RetryPolicy::new(50, 5_000, 5_000), "c");
    let cancel = CancellationToken::new();

    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
    });
    let c = item("vid-6");
    let r = accepted();
    let res = d.publish(&c, &r, &cancel).await;

    assert!(matches!(res, Err(PipelineError::Cancelled)));
    assert!(publisher.call_count() < 50);
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn accepted_but_unidentified_post_is_committed_without_retry() {
    let publisher = Arc::new(MockPublisher::new());
    publisher.push_unconfirmed();
    let store = Arc::new(MemoryDedupStore::new());
    let d = dispatcher(publisher.clone(), store.clone());

    let out = d
        .publish(&item("vid-9"), &accepted(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(out, PublishOutcome::Published(PostReference { id: None, .. })));
    assert_eq!(publisher.call_count(), 1);
    assert!(store.contains("vid-9").unwrap());
}

#[tokio::test]
async fn feed_sync_seeds_youtube_links_only() {
    let publisher = Arc::new(MockPublisher::new());
    let at = Utc::now() - ChronoDuration::hours(3);
    publisher.set_feed(vec![
        FeedPost {
            id: 11,
            title: "[F1] Bahrain".into(),
            url: Some("https://www.youtube.com/watch?v=vid-1".into()),
            published_at: Some(at),
        },
        FeedPost {
            id: 12,
            title: "[WRC] Sweden".into(),
            url: Some("https://youtu.be/vid-2".into()),
            published_at: None,
        },
        FeedPost {
            id: 13,
            title: "Discussion thread".into(),
            url: None,
            published_at: None,
        },
        FeedPost {
            id: 14,
            title: "News".into(),
            url: Some("https://example.com/article".into()),
            published_at: None,
        },
    ]);
    let store = Arc::new(MemoryDedupStore::new());
    let d = dispatcher(publisher.clone(), store.clone());

    assert_eq!(d.sync_from_feed(50).await.unwrap(), 2);
    assert!(store.contains("vid-1").unwrap());
    assert!(store.contains("vid-2").unwrap());
    assert_eq!(store.records()[0].published_at, at);

    // Already-posted items are skipped without a publish call.
    let out = d.publish(&item("vid-1"), &accepted(), &CancellationToken::new()).await.unwrap();
    assert_eq!(out, PublishOutcome::AlreadyPublished);
    assert_eq!(publisher.call_count(), 0);

    // A second sync finds nothing new.
    assert_eq!(d.sync_from_feed(50).await.unwrap(), 0);
}

#[tokio::test]
async fn feed_sync_writes_nothing_in_dry_run() {
    let publisher = Arc::new(MockPublisher::new());
    publisher.set_feed(vec![FeedPost {
        id: 1,
        title: "x".into(),
        url: Some("https://youtu.be/vid-1".into()),
        published_at: None,
    }]);
    let store = Arc::new(MemoryDedupStore::new());
    let d = dispatcher(publisher, store.clone()).with_dry_run(true);
    assert_eq!(d.sync_from_feed(50).await.unwrap(), 0);
    assert!(store.is_empty().unwrap());
}

#[tokio::test]
async fn feed_sync_surfaces_store_failure() {
    let publisher = Arc::new(MockPublisher::new());
    publisher.set_feed(vec![FeedPost {
        id: 1,
        title: "x".into(),
        url: Some("https://youtu.be/vid-1".into()),
        published_at: None,
    }]);
    let store = Arc::new(MemoryDedupStore::new());
    store.set_available(false);
    let d = dispatcher(publisher, store);
    let err = d.sync_from_feed(50).await.unwrap_err();
    assert!(err.is_fatal());
}
