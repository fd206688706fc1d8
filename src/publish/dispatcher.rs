// src/publish/dispatcher.rs
//! Publish one accepted item: dedup re-check, in-flight claim, bounded
//! retries with jittered backoff, and the dedup commit after success.
//!
//! Ordering is publish first, then `insert_record`. A record is never
//! written for a post that did not happen; an item dropped after exhausting
//! retries has no record and is rediscovered on a later cycle.

use chrono::{Duration as ChronoDuration, Utc};
use metrics::counter;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{FeedPublisher, PostReference, PublishRequest};
use crate::error::{PipelineError, ReasonCode};
use crate::ingest::extract_video_id;
use crate::ingest::types::Candidate;
use crate::retry::RetryPolicy;
use crate::scoring::text::title_key;
use crate::scoring::ScoreResult;
use crate::store::{DedupRecord, DedupStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published(PostReference),
    /// A record exists, or another task is publishing the same item right now.
    AlreadyPublished,
    /// The channel published a title with the same fingerprint recently.
    NearDuplicate { of: String },
    /// Dry-run mode: nothing sent, nothing recorded.
    DryRun,
    /// Given up for this cycle. No record was written.
    Dropped {
        attempts: u32,
        reason: ReasonCode,
        detail: String,
    },
}

pub struct PublishDispatcher {
    publisher: Arc<dyn FeedPublisher>,
    store: Arc<dyn DedupStore>,
    policy: RetryPolicy,
    community: String,
    call_timeout: Duration,
    dry_run: bool,
    near_duplicate_window: Option<ChronoDuration>,
    in_flight: Mutex<HashSet<String>>,
}

/// Releases the in-flight claim when the publish attempt ends, however it ends.
struct Claim<'a> {
    set: &'a Mutex<HashSet<String>>,
    item_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        let mut g = self.set.lock().unwrap_or_else(|p| p.into_inner());
        g.remove(&self.item_id);
    }
}

impl PublishDispatcher {
    pub fn new(
        publisher: Arc<dyn FeedPublisher>,
        store: Arc<dyn DedupStore>,
        policy: RetryPolicy,
        community: impl Into<String>,
    ) -> Self {
        Self {
            publisher,
            store,
            policy,
            community: community.into(),
            call_timeout: Duration::from_secs(20),
            dry_run: false,
            near_duplicate_window: None,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Enable the title-fingerprint check over the last `hours`; 0 disables it.
    pub fn with_near_duplicate_hours(mut self, hours: i64) -> Self {
        self.near_duplicate_window = (hours > 0).then(|| ChronoDuration::hours(hours));
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    pub fn store(&self) -> &Arc<dyn DedupStore> {
        &self.store
    }

    fn claim(&self, item_id: &str) -> Option<Claim<'_>> {
        let mut g = self.in_flight.lock().unwrap_or_else(|p| p.into_inner());
        if !g.insert(item_id.to_string()) {
            return None;
        }
        Some(Claim {
            set: &self.in_flight,
            item_id: item_id.to_string(),
        })
    }

    /// Errors are reserved for cycle-level conditions: an untrustworthy
    /// dedup store, or cancellation. Per-item failures come back as `Dropped`.
    pub async fn publish(
        &self,
        candidate: &Candidate,
        result: &ScoreResult,
        cancel: &CancellationToken,
    ) -> Result<PublishOutcome, PipelineError> {
        if cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        let item_id = candidate.item_id.as_str();
        if self.store.contains(item_id)? {
            return Ok(PublishOutcome::AlreadyPublished);
        }
        let key = title_key(&candidate.title);
        if let Some(window) = self.near_duplicate_window {
            if let Some(of) = self.store.find_similar(&candidate.channel_id, &key, Utc::now() - window)? {
                tracing::info!(target: "publish", item = item_id, of = %of, "near duplicate of a recent post");
                return Ok(PublishOutcome::NearDuplicate { of });
            }
        }
        let Some(_claim) = self.claim(item_id) else {
            tracing::debug!(target: "publish", item = item_id, "already in flight");
            return Ok(PublishOutcome::AlreadyPublished);
        };

        let req = PublishRequest {
            title: candidate.title.clone(),
            url: candidate.url.clone(),
            tag: result.tag.clone(),
            community: self.community.clone(),
        };

        if self.dry_run {
            tracing::info!(
                target: "publish",
                item = item_id,
                score = result.score,
                tag = %req.tag,
                title = %req.title,
                "dry run: would publish"
            );
            return Ok(PublishOutcome::DryRun);
        }

        let mut last_error = String::new();
        for attempt in 1..=self.policy.max_attempts {
            counter!("blueflag_publish_attempts_total").increment(1);
            let sent = tokio::time::timeout(self.call_timeout, self.publisher.publish_item(&req)).await;

            let err = match sent {
                Ok(Ok(post)) => {
                    let rec = DedupRecord::new(item_id, Utc::now()).with_title_key(&candidate.channel_id, &key);
                    return self.commit(rec, post, attempt);
                }
                Ok(Err(PipelineError::PublishRejected(msg))) => {
                    tracing::warn!(target: "publish", item = item_id, attempt, error = %msg, "publish rejected");
                    return Ok(self.dropped(attempt, ReasonCode::PublishRejected, msg));
                }
                Ok(Err(e)) if e.is_fatal() => return Err(e),
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "{} timed out after {}ms",
                    self.publisher.name(),
                    self.call_timeout.as_millis()
                ),
            };

            tracing::warn!(target: "publish", item = item_id, attempt, error = %err, "publish attempt failed");
            last_error = err;
            if !self.policy.can_retry(attempt) {
                break;
            }

            let delay = self.policy.delay_for_attempt(attempt);
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(target: "publish", item = item_id, "retry abandoned on shutdown");
                    return Err(PipelineError::Cancelled);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Ok(self.dropped(self.policy.max_attempts, ReasonCode::RetriesExhausted, last_error))
    }

    fn commit(&self, rec: DedupRecord, post: PostReference, attempt: u32) -> Result<PublishOutcome, PipelineError> {
        counter!("blueflag_published_total").increment(1);
        let item_id = rec.item_id.clone();
        let inserted = match self.store.insert_record(rec) {
            Ok(inserted) => inserted,
            Err(e) => {
                tracing::error!(
                    target: "publish",
                    item = %item_id,
                    post_id = ?post.id,
                    error = %e,
                    "posted but the dedup record could not be written"
                );
                return Err(e.into());
            }
        };
        if !inserted {
            tracing::warn!(target: "publish", item = %item_id, post_id = ?post.id, "record already existed after publish");
        }
        tracing::info!(
            target: "publish",
            item = %item_id,
            post_id = ?post.id,
            attempts = attempt,
            "published"
        );
        Ok(PublishOutcome::Published(post))
    }

    /// Record every YouTube link among the feed's newest posts, so items
    /// posted by an earlier deployment or by hand are never posted again.
    /// Returns how many records were new.
    pub async fn sync_from_feed(&self, limit: u32) -> Result<usize, PipelineError> {
        if self.dry_run {
            tracing::info!(target: "publish", "dry run: feed sync skipped");
            return Ok(0);
        }
        let listed = tokio::time::timeout(self.call_timeout, self.publisher.recent_posts(&self.community, limit)).await;
        let posts = match listed {
            Ok(posts) => posts?,
            Err(_) => {
                return Err(PipelineError::SourceUnavailable(format!(
                    "{} feed listing timed out after {}ms",
                    self.publisher.name(),
                    self.call_timeout.as_millis()
                )))
            }
        };

        let mut seeded = 0usize;
        for post in &posts {
            let Some(video_id) = post.url.as_deref().and_then(extract_video_id) else {
                continue;
            };
            let at = post.published_at.unwrap_or_else(Utc::now);
            if self.store.insert_record(DedupRecord::new(&video_id, at))? {
                seeded += 1;
            }
        }
        counter!("blueflag_feed_synced_total").increment(seeded as u64);
        tracing::info!(
            target: "publish",
            community = %self.community,
            listed = posts.len(),
            seeded,
            "dedup ledger synced from feed"
        );
        Ok(seeded)
    }

    fn dropped(&self, attempts: u32, reason: ReasonCode, detail: String) -> PublishOutcome {
        counter!("blueflag_publish_dropped_total", "reason" => reason.as_str()).increment(1);
        PublishOutcome::Dropped {
            attempts,
            reason,
            detail,
        }
    }
}
