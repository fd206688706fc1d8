// src/publish/mod.rs
//! Feed publication: the collaborator trait, concrete publishers and the
//! dispatcher that wraps them with retry and the dedup commit.

pub mod dispatcher;
pub mod lemmy;
pub mod mock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

pub use dispatcher::{PublishDispatcher, PublishOutcome};
pub use lemmy::LemmyPublisher;
pub use mock::MockPublisher;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub title: String,
    pub url: String,
    pub tag: String,
    pub community: String,
}

/// Handle to a post the feed accepted. `id` is `None` when the feed
/// answered 2xx but the body did not identify the post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostReference {
    pub id: Option<i64>,
    #[serde(default)]
    pub url: Option<String>,
}

/// A post already on the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedPost {
    pub id: i64,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait FeedPublisher: Send + Sync {
    /// Fails with `PublishRejected` (permanent) or `SourceUnavailable` (transient).
    /// Once the feed has accepted the post this must return `Ok`, even if
    /// the response cannot be read.
    async fn publish_item(&self, req: &PublishRequest) -> Result<PostReference, PipelineError>;

    /// Newest posts in `community`, newest first.
    async fn recent_posts(&self, community: &str, limit: u32) -> Result<Vec<FeedPost>, PipelineError> {
        let _ = (community, limit);
        Ok(Vec::new())
    }

    fn name(&self) -> &'static str;
}
