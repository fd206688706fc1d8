// src/error.rs
//! Error taxonomy shared by every pipeline stage, plus the closed set of
//! reason codes used when reporting skips, rejections, retries and drops.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Failures of the durable state (dedup records, quota window).
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store i/o failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store file {path} is corrupt: {detail}")]
    Corrupt { path: PathBuf, detail: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Throttling signal. Skip this unit of work and keep going.
    #[error("quota exhausted: {needed} units requested, {remaining} remaining")]
    QuotaExhausted { needed: u64, remaining: u64 },

    #[error("source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("rate limited by source")]
    RateLimited,

    #[error("publish rejected: {0}")]
    PublishRejected(String),

    /// Dedup or quota state cannot be trusted; the cycle must stop.
    #[error("persistent store unavailable: {0}")]
    PersistentStoreUnavailable(#[from] StoreError),

    #[error("cancelled")]
    Cancelled,
}

impl PipelineError {
    /// Only infrastructure failures escalate past a single channel or item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::PersistentStoreUnavailable(_))
    }

    /// Worth another attempt later in the same publish loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceUnavailable(_) | Self::RateLimited)
    }

    pub fn reason(&self) -> ReasonCode {
        match self {
            Self::QuotaExhausted { .. } => ReasonCode::QuotaExhausted,
            Self::SourceUnavailable(_) => ReasonCode::SourceUnavailable,
            Self::RateLimited => ReasonCode::RateLimited,
            Self::PublishRejected(_) => ReasonCode::PublishRejected,
            Self::PersistentStoreUnavailable(_) => ReasonCode::StoreUnavailable,
            Self::Cancelled => ReasonCode::Cancelled,
        }
    }
}

/// Why an item or channel did not make it to the feed this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    AutoReject,
    BelowThreshold,
    ShortVideo,
    Upcoming,
    AlreadyPublished,
    /// Same channel published a matching title fingerprint recently.
    NearDuplicate,
    QuotaExhausted,
    SourceUnavailable,
    RateLimited,
    PublishRejected,
    RetriesExhausted,
    RunCapReached,
    HourlyCapReached,
    DailyCapReached,
    DryRun,
    Cancelled,
    StoreUnavailable,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoReject => "auto_reject",
            Self::BelowThreshold => "below_threshold",
            Self::ShortVideo => "short_video",
            Self::Upcoming => "upcoming",
            Self::AlreadyPublished => "already_published",
            Self::NearDuplicate => "near_duplicate",
            Self::QuotaExhausted => "quota_exhausted",
            Self::SourceUnavailable => "source_unavailable",
            Self::RateLimited => "rate_limited",
            Self::PublishRejected => "publish_rejected",
            Self::RetriesExhausted => "retries_exhausted",
            Self::RunCapReached => "run_cap_reached",
            Self::HourlyCapReached => "hourly_cap_reached",
            Self::DailyCapReached => "daily_cap_reached",
            Self::DryRun => "dry_run",
            Self::Cancelled => "cancelled",
            Self::StoreUnavailable => "store_unavailable",
        }
    }
}

impl std::fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
