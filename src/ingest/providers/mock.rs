// src/ingest/providers/mock.rs
//! Scripted lookup collaborator for tests and local runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::error::PipelineError;
use crate::ingest::types::{RawItem, VideoSource};

#[derive(Default)]
pub struct MockSource {
    items: Mutex<HashMap<String, Vec<RawItem>>>,
    failing: Mutex<HashSet<String>>,
    rate_limited: Mutex<HashSet<String>>,
    delay: Mutex<Option<Duration>>,
    calls: AtomicUsize,
    polled: Mutex<Vec<String>>,
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl MockSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the items returned for `channel_id`.
    pub fn set_items(&self, channel_id: &str, items: Vec<RawItem>) {
        guard(&self.items).insert(channel_id.to_string(), items);
    }

    pub fn with_items(self, channel_id: &str, items: Vec<RawItem>) -> Self {
        self.set_items(channel_id, items);
        self
    }

    pub fn set_failing(&self, channel_id: &str, failing: bool) {
        let mut g = guard(&self.failing);
        if failing {
            g.insert(channel_id.to_string());
        } else {
            g.remove(channel_id);
        }
    }

    pub fn set_rate_limited(&self, channel_id: &str) {
        guard(&self.rate_limited).insert(channel_id.to_string());
    }

    /// Artificial latency per call.
    pub fn set_delay(&self, delay: Duration) {
        *guard(&self.delay) = Some(delay);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn polled_channels(&self) -> Vec<String> {
        guard(&self.polled).clone()
    }
}

#[async_trait]
impl VideoSource for MockSource {
    async fn fetch_recent_items(
        &self,
        channel_id: &str,
        _since: DateTime<Utc>,
    ) -> Result<Vec<RawItem>, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        guard(&self.polled).push(channel_id.to_string());

        let delay = *guard(&self.delay);
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if guard(&self.rate_limited).contains(channel_id) {
            return Err(PipelineError::RateLimited);
        }
        if guard(&self.failing).contains(channel_id) {
            return Err(PipelineError::SourceUnavailable(format!(
                "mock: channel {channel_id} unreachable"
            )));
        }
        Ok(guard(&self.items).get(channel_id).cloned().unwrap_or_default())
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
