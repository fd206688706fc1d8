// src/publish/mock.rs
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{FeedPost, FeedPublisher, PostReference, PublishRequest};
use crate::error::PipelineError;

enum Scripted {
    Posted,
    /// Accepted, but the response did not identify the post.
    Unconfirmed,
    Failed(PipelineError),
}

/// Scripted publisher. Each call pops the next scripted result; once the
/// script is empty every call succeeds with a fresh post id.
#[derive(Default)]
pub struct MockPublisher {
    script: Mutex<VecDeque<Scripted>>,
    calls: Mutex<Vec<PublishRequest>>,
    feed: Mutex<Vec<FeedPost>>,
    next_id: AtomicI64,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl MockPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_failure(&self, err: PipelineError) {
        guard(&self.script).push_back(Scripted::Failed(err));
    }

    pub fn push_success(&self) {
        guard(&self.script).push_back(Scripted::Posted);
    }

    pub fn push_unconfirmed(&self) {
        guard(&self.script).push_back(Scripted::Unconfirmed);
    }

    /// Fail the next `n` calls with `SourceUnavailable`.
    pub fn fail_times(self, n: usize) -> Self {
        for i in 0..n {
            self.push_failure(PipelineError::SourceUnavailable(format!("mock outage #{}", i + 1)));
        }
        self
    }

    /// Posts returned by `recent_posts`, newest first.
    pub fn set_feed(&self, posts: Vec<FeedPost>) {
        *guard(&self.feed) = posts;
    }

    pub fn calls(&self) -> Vec<PublishRequest> {
        guard(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        guard(&self.calls).len()
    }
}

#[async_trait]
impl FeedPublisher for MockPublisher {
    async fn publish_item(&self, req: &PublishRequest) -> Result<PostReference, PipelineError> {
        guard(&self.calls).push(req.clone());
        let scripted = guard(&self.script).pop_front();
        match scripted {
            Some(Scripted::Failed(e)) => Err(e),
            Some(Scripted::Unconfirmed) => Ok(PostReference { id: None, url: None }),
            Some(Scripted::Posted) | None => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(PostReference {
                    id: Some(id),
                    url: Some(format!("https://feed.invalid/post/{id}")),
                })
            }
        }
    }

    async fn recent_posts(&self, _community: &str, limit: u32) -> Result<Vec<FeedPost>, PipelineError> {
        Ok(guard(&self.feed).iter().take(limit as usize).cloned().collect())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
