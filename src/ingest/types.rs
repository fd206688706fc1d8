// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Whether an item can be published right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    Available,
    /// Live broadcast in progress.
    Live,
    /// Premiere or live event that has not started yet.
    Upcoming,
}

/// Item as returned by the lookup collaborator, before normalization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawItem {
    pub item_id: String,
    pub channel_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub url: Option<String>,
    pub availability: Availability,
    #[serde(default)]
    pub duration_secs: Option<u64>,
    #[serde(default)]
    pub view_count: Option<u64>,
}

impl RawItem {
    pub fn new(item_id: &str, channel_id: &str, title: &str) -> Self {
        Self {
            item_id: item_id.to_string(),
            channel_id: channel_id.to_string(),
            title: title.to_string(),
            description: String::new(),
            published_at: Utc::now(),
            url: None,
            availability: Availability::Available,
            duration_secs: None,
            view_count: None,
        }
    }

    pub fn with_description(mut self, d: &str) -> Self {
        self.description = d.to_string();
        self
    }

    pub fn with_availability(mut self, a: Availability) -> Self {
        self.availability = a;
        self
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_views(mut self, views: u64) -> Self {
        self.view_count = Some(views);
        self
    }

    pub fn with_published_at(mut self, at: DateTime<Utc>) -> Self {
        self.published_at = at;
        self
    }
}

/// One discovered item pending scoring within a cycle. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub item_id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
    pub url: String,
    pub availability: Availability,
    pub duration_secs: Option<u64>,
    /// Unknown when the source did not report statistics.
    pub view_count: Option<u64>,
}

impl Candidate {
    pub fn is_upcoming(&self) -> bool {
        self.availability == Availability::Upcoming
    }

    pub fn is_live(&self) -> bool {
        self.availability == Availability::Live
    }
}

/// Channel lookup collaborator.
#[async_trait::async_trait]
pub trait VideoSource: Send + Sync {
    /// Recent items for one channel. Fails with `SourceUnavailable` or `RateLimited`.
    async fn fetch_recent_items(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawItem>, PipelineError>;

    fn name(&self) -> &'static str;
}
