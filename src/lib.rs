// src/lib.rs
// Public library surface for the binary and the integration tests.

pub mod api;
pub mod config;
pub mod error;
pub mod ingest;
pub mod metrics;
pub mod publish;
pub mod retry;
pub mod scheduler;
pub mod scoring;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::router;
pub use crate::config::{AppConfig, Channel, KeywordTable};
pub use crate::error::{PipelineError, ReasonCode, StoreError};
pub use crate::scheduler::{CycleOutcome, CycleReport, Scheduler, SchedulerSettings, SchedulerState};

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;

use crate::ingest::providers::YouTubeSource;
use crate::ingest::ChannelPoller;
use crate::publish::{LemmyPublisher, PublishDispatcher};
use crate::retry::RetryPolicy;
use crate::scoring::ScoringEngine;
use crate::store::{FileDedupStore, QuotaLedger, WindowPolicy};

/// Quota window layout from `[quota]`.
pub fn window_policy(cfg: &AppConfig) -> WindowPolicy {
    WindowPolicy::new(
        chrono::Duration::hours(cfg.quota.window_hours),
        chrono::Duration::hours(i64::from(cfg.quota.window_anchor_hour_utc)),
    )
}

/// Open the durable stores named in the config.
pub fn open_stores(cfg: &AppConfig) -> Result<(Arc<FileDedupStore>, Arc<QuotaLedger>)> {
    let dedup = FileDedupStore::open(&cfg.dedup.path)
        .with_context(|| format!("opening dedup store {}", cfg.dedup.path.display()))?;
    let ledger = QuotaLedger::open(&cfg.quota.state_path, cfg.quota.ceiling, window_policy(cfg))
        .with_context(|| format!("opening quota ledger {}", cfg.quota.state_path.display()))?;
    Ok((Arc::new(dedup), Arc::new(ledger)))
}

/// Wire the production pipeline: YouTube source, Lemmy publisher, file stores.
pub fn build_scheduler(cfg: &AppConfig) -> Result<Scheduler> {
    let channels = cfg.load_channels()?;
    let keywords = cfg.load_keywords()?;
    let (dedup, ledger) = open_stores(cfg)?;
    let call_timeout = Duration::from_secs(cfg.scan.call_timeout_secs.max(1));

    let source = YouTubeSource::new(cfg.youtube_api_key()?, &cfg.youtube.base_url, cfg.youtube.max_results)?;
    let poller = ChannelPoller::new(Arc::new(source), ledger, cfg.quota.units_per_poll)
        .with_timeout(call_timeout)
        .with_lookback_hours(cfg.scan.lookback_hours);

    let publisher = LemmyPublisher::new(&cfg.lemmy.instance, cfg.lemmy.username.clone(), cfg.lemmy_password()?)?;
    let dispatcher = PublishDispatcher::new(
        Arc::new(publisher),
        dedup,
        RetryPolicy::from(&cfg.publish),
        cfg.lemmy.community.clone(),
    )
    .with_timeout(call_timeout)
    .with_dry_run(cfg.publish.dry_run)
    .with_near_duplicate_hours(cfg.dedup.near_duplicate_hours);

    tracing::info!(
        channels = channels.len(),
        community = %cfg.lemmy.community,
        dry_run = cfg.publish.dry_run,
        "pipeline assembled"
    );
    Ok(Scheduler::new(
        channels,
        poller,
        ScoringEngine::new(&keywords, cfg.scoring.clone()),
        dispatcher,
        SchedulerSettings::from_config(cfg),
    ))
}
