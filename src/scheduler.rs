// src/scheduler.rs
//! Cycle orchestration: poll → score → dedup filter → publish.
//!
//! States: `Idle → Scanning → Publishing → Idle`, plus `Backoff` entered on
//! a fatal (store-level) failure. Backoff cools down geometrically on
//! consecutive failures and resets after one fully successful cycle.
//!
//! One cycle runs at a time. A timer tick or trigger arriving while a cycle
//! is active is coalesced, not queued. `run_cycle` is the one-shot entry and
//! `run_continuous` drives the same method on an interval.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::stream::{self, StreamExt};
use metrics::{counter, gauge, histogram};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, BackoffConfig, Channel};
use crate::error::{PipelineError, ReasonCode};
use crate::ingest::types::Candidate;
use crate::ingest::ChannelPoller;
use crate::publish::{PublishDispatcher, PublishOutcome};
use crate::retry::cooldown;
use crate::scoring::{Decision, ScoreResult, ScoringEngine};
use crate::store::QuotaState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SchedulerState {
    Idle,
    Scanning,
    Publishing,
    Backoff {
        until: DateTime<Utc>,
        consecutive_failures: u32,
    },
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval: Duration,
    pub poll_workers: usize,
    pub max_posts_per_run: usize,
    pub max_posts_per_hour: usize,
    pub max_posts_per_day: usize,
    pub post_spacing: Duration,
    pub backoff: BackoffConfig,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

impl SchedulerSettings {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            interval: Duration::from_secs(cfg.scan.interval_minutes.max(1) * 60),
            poll_workers: cfg.scan.poll_workers.max(1),
            max_posts_per_run: cfg.scan.max_posts_per_run,
            max_posts_per_hour: cfg.scan.max_posts_per_hour,
            max_posts_per_day: cfg.scan.max_posts_per_day,
            post_spacing: Duration::from_secs(cfg.scan.time_between_posts_secs),
            backoff: cfg.backoff.clone(),
        }
    }
}

/// Why one item or channel did not make it to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,
    pub channel_id: String,
    pub reason: ReasonCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedItem {
    pub item_id: String,
    pub channel_id: String,
    pub tag: String,
    pub score: i32,
    /// `None` when the feed accepted the post without identifying it.
    pub post_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub channels_polled: usize,
    pub candidates: usize,
    pub accepted: usize,
    pub deferred: usize,
    pub published: Vec<PublishedItem>,
    pub skipped: Vec<SkipRecord>,
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal: Option<String>,
    pub quota_remaining: u64,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            finished_at: started_at,
            channels_polled: 0,
            candidates: 0,
            accepted: 0,
            deferred: 0,
            published: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
            fatal: None,
            quota_remaining: 0,
        }
    }

    fn skip(&mut self, item_id: Option<&str>, channel_id: &str, reason: ReasonCode, detail: Option<String>) {
        self.skipped.push(SkipRecord {
            item_id: item_id.map(str::to_string),
            channel_id: channel_id.to_string(),
            reason,
            detail,
        });
    }

    /// Skip records carrying `reason`.
    pub fn skipped_for(&self, reason: ReasonCode) -> impl Iterator<Item = &SkipRecord> {
        self.skipped.iter().filter(move |s| s.reason == reason)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Completed(CycleReport),
    /// Another cycle was already running; this request was dropped.
    Coalesced,
    /// Still cooling down after a fatal failure.
    BackingOff { until: DateTime<Utc> },
}

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    #[serde(flatten)]
    pub state: SchedulerState,
    pub in_cycle: bool,
    pub channels: usize,
    pub quota: QuotaState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_records: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_report: Option<CycleReport>,
}

pub struct Scheduler {
    channels: Vec<Channel>,
    poller: ChannelPoller,
    engine: ScoringEngine,
    dispatcher: PublishDispatcher,
    settings: SchedulerSettings,
    state: Mutex<SchedulerState>,
    in_cycle: AtomicBool,
    consecutive_failures: AtomicU32,
    last_report: Mutex<Option<CycleReport>>,
    trigger: Notify,
}

/// Clears the in-cycle flag when the cycle future ends or is dropped.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

type Queued = (Candidate, ScoreResult);

impl Scheduler {
    pub fn new(
        channels: Vec<Channel>,
        poller: ChannelPoller,
        engine: ScoringEngine,
        dispatcher: PublishDispatcher,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            channels,
            poller,
            engine,
            dispatcher,
            settings,
            state: Mutex::new(SchedulerState::Idle),
            in_cycle: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            last_report: Mutex::new(None),
            trigger: Notify::new(),
        }
    }

    pub fn state(&self) -> SchedulerState {
        *guard(&self.state)
    }

    pub fn is_in_cycle(&self) -> bool {
        self.in_cycle.load(Ordering::SeqCst)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        guard(&self.last_report).clone()
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            state: self.state(),
            in_cycle: self.is_in_cycle(),
            channels: self.channels.len(),
            quota: self.poller.ledger().snapshot(),
            published_records: self.dispatcher.store().len().ok(),
            last_report: self.last_report(),
        }
    }

    /// Ask the continuous loop for an immediate cycle. Returns `false` when a
    /// cycle is already running (the request is coalesced into it).
    pub fn trigger(&self) -> bool {
        if self.is_in_cycle() {
            return false;
        }
        self.trigger.notify_one();
        true
    }

    fn set_state(&self, s: SchedulerState) {
        *guard(&self.state) = s;
    }

    /// Remaining cooldown, if the scheduler is in `Backoff`.
    fn backoff_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self.state() {
            SchedulerState::Backoff { until, .. } => Some((until - now).to_std().unwrap_or(Duration::ZERO)),
            _ => None,
        }
    }

    fn leave_backoff(&self) {
        let mut st = guard(&self.state);
        if matches!(*st, SchedulerState::Backoff { .. }) {
            tracing::info!(target: "scheduler", "cooldown elapsed, back to idle");
            *st = SchedulerState::Idle;
        }
    }

    fn enter_backoff(&self) -> DateTime<Utc> {
        let n = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let wait = cooldown(&self.settings.backoff, n);
        let until = Utc::now() + ChronoDuration::from_std(wait).unwrap_or_else(|_| ChronoDuration::hours(1));
        self.set_state(SchedulerState::Backoff {
            until,
            consecutive_failures: n,
        });
        tracing::error!(
            target: "scheduler",
            consecutive_failures = n,
            cooldown_secs = wait.as_secs(),
            "entering backoff"
        );
        until
    }

    /// Run exactly one cycle. Fatal failures put the scheduler into `Backoff`
    /// and are returned as `Err`; everything else is in the report.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<CycleOutcome, PipelineError> {
        if self
            .in_cycle
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!(target: "scheduler", "cycle already running, request coalesced");
            counter!("blueflag_cycles_total", "outcome" => "coalesced").increment(1);
            return Ok(CycleOutcome::Coalesced);
        }
        let _guard = CycleGuard(&self.in_cycle);

        let now = Utc::now();
        if let SchedulerState::Backoff { until, .. } = self.state() {
            if until > now {
                return Ok(CycleOutcome::BackingOff { until });
            }
            self.leave_backoff();
        }

        let clock = Instant::now();
        let mut report = CycleReport::new(now);
        let result = self.cycle(cancel, &mut report).await;

        report.finished_at = Utc::now();
        report.quota_remaining = self.poller.ledger().window_remaining();
        histogram!("blueflag_cycle_duration_ms").record(clock.elapsed().as_millis() as f64);
        gauge!("blueflag_last_cycle_ts").set(report.finished_at.timestamp() as f64);

        match result {
            Ok(()) => {
                self.set_state(SchedulerState::Idle);
                let outcome = if report.cancelled {
                    "cancelled"
                } else {
                    self.consecutive_failures.store(0, Ordering::SeqCst);
                    "ok"
                };
                counter!("blueflag_cycles_total", "outcome" => outcome).increment(1);
                tracing::info!(
                    target: "scheduler",
                    outcome,
                    polled = report.channels_polled,
                    candidates = report.candidates,
                    accepted = report.accepted,
                    published = report.published.len(),
                    skipped = report.skipped.len(),
                    quota_remaining = report.quota_remaining,
                    "cycle finished"
                );
                *guard(&self.last_report) = Some(report.clone());
                Ok(CycleOutcome::Completed(report))
            }
            Err(e) => {
                counter!("blueflag_cycles_total", "outcome" => "fatal").increment(1);
                tracing::error!(target: "scheduler", error = %e, "cycle aborted");
                report.fatal = Some(e.to_string());
                self.enter_backoff();
                *guard(&self.last_report) = Some(report);
                Err(e)
            }
        }
    }

    async fn cycle(&self, cancel: &CancellationToken, report: &mut CycleReport) -> Result<(), PipelineError> {
        self.set_state(SchedulerState::Scanning);
        let queue = self.scan(cancel, report).await?;
        if report.cancelled {
            return Ok(());
        }
        self.set_state(SchedulerState::Publishing);
        self.publish_all(queue, cancel, report).await
    }

    async fn scan(&self, cancel: &CancellationToken, report: &mut CycleReport) -> Result<Vec<Queued>, PipelineError> {
        let store = self.dispatcher.store();
        let mut queue = Vec::new();

        // `buffered` keeps configured channel order in the results.
        let polls: Vec<_> = self
            .channels
            .iter()
            .map(|ch| self.poll_channel(ch, cancel))
            .collect();
        let mut polls = stream::iter(polls).buffered(self.settings.poll_workers);

        while let Some((channel, polled)) = polls.next().await {
            let candidates = match polled {
                Ok(c) => c,
                Err(PipelineError::Cancelled) => {
                    report.cancelled = true;
                    report.skip(None, &channel.id, ReasonCode::Cancelled, None);
                    continue;
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        target: "scheduler",
                        channel = %channel.id,
                        reason = e.reason().as_str(),
                        error = %e,
                        "channel skipped"
                    );
                    report.skip(None, &channel.id, e.reason(), Some(e.to_string()));
                    continue;
                }
            };
            report.channels_polled += 1;

            for candidate in candidates {
                report.candidates += 1;
                if store.contains(&candidate.item_id)? {
                    report.skip(Some(&candidate.item_id), &channel.id, ReasonCode::AlreadyPublished, None);
                    continue;
                }
                let result = self.engine.score_at(&candidate, channel, report.started_at);
                counter!("blueflag_candidates_total", "decision" => result.decision.as_str()).increment(1);
                tracing::debug!(
                    target: "scheduler",
                    item = %candidate.item_id,
                    score = result.score,
                    decision = result.decision.as_str(),
                    tag = %result.tag,
                    "scored"
                );
                match result.decision {
                    Decision::Accept => {
                        report.accepted += 1;
                        queue.push((candidate, result));
                    }
                    Decision::Defer => {
                        report.deferred += 1;
                        report.skip(Some(&candidate.item_id), &channel.id, ReasonCode::Upcoming, None);
                    }
                    Decision::Reject => {
                        let reason = result.reason.unwrap_or(ReasonCode::BelowThreshold);
                        report.skip(
                            Some(&candidate.item_id),
                            &channel.id,
                            reason,
                            Some(format!("score {}", result.score)),
                        );
                    }
                }
            }
        }
        Ok(queue)
    }

    async fn poll_channel<'a>(
        &'a self,
        channel: &'a Channel,
        cancel: &CancellationToken,
    ) -> (&'a Channel, Result<Vec<Candidate>, PipelineError>) {
        if cancel.is_cancelled() {
            return (channel, Err(PipelineError::Cancelled));
        }
        (channel, self.poller.poll(channel).await)
    }

    async fn publish_all(
        &self,
        mut queue: Vec<Queued>,
        cancel: &CancellationToken,
        report: &mut CycleReport,
    ) -> Result<(), PipelineError> {
        // Highest score first; the sort is stable so channel order breaks ties.
        queue.sort_by(|(_, a), (_, b)| b.score.cmp(&a.score));

        let store = self.dispatcher.store();
        let now = Utc::now();
        let mut last_hour = store.published_since(now - ChronoDuration::hours(1))?;
        let mut last_day = store.published_since(now - ChronoDuration::hours(24))?;
        let mut this_run = 0usize;
        let mut posted = 0usize;

        for (candidate, result) in queue {
            let item = Some(candidate.item_id.as_str());
            let channel = candidate.channel_id.as_str();

            if report.cancelled || cancel.is_cancelled() {
                report.cancelled = true;
                report.skip(item, channel, ReasonCode::Cancelled, None);
                continue;
            }
            let cap = if this_run >= self.settings.max_posts_per_run {
                Some(ReasonCode::RunCapReached)
            } else if last_hour >= self.settings.max_posts_per_hour {
                Some(ReasonCode::HourlyCapReached)
            } else if last_day >= self.settings.max_posts_per_day {
                Some(ReasonCode::DailyCapReached)
            } else {
                None
            };
            if let Some(reason) = cap {
                report.skip(item, channel, reason, None);
                continue;
            }

            if posted > 0 && !self.settings.post_spacing.is_zero() && !self.dispatcher.is_dry_run() {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        report.cancelled = true;
                        report.skip(item, channel, ReasonCode::Cancelled, None);
                        continue;
                    }
                    _ = tokio::time::sleep(self.settings.post_spacing) => {}
                }
            }

            match self.dispatcher.publish(&candidate, &result, cancel).await {
                Ok(PublishOutcome::Published(post)) => {
                    this_run += 1;
                    posted += 1;
                    last_hour += 1;
                    last_day += 1;
                    report.published.push(PublishedItem {
                        item_id: candidate.item_id.clone(),
                        channel_id: candidate.channel_id.clone(),
                        tag: result.tag.clone(),
                        score: result.score,
                        post_id: post.id,
                    });
                }
                Ok(PublishOutcome::DryRun) => {
                    this_run += 1;
                    report.skip(item, channel, ReasonCode::DryRun, Some(format!("[{}] {}", result.tag, candidate.title)));
                }
                Ok(PublishOutcome::AlreadyPublished) => {
                    report.skip(item, channel, ReasonCode::AlreadyPublished, None);
                }
                Ok(PublishOutcome::NearDuplicate { of }) => {
                    report.skip(item, channel, ReasonCode::NearDuplicate, Some(format!("matches {of}")));
                }
                Ok(PublishOutcome::Dropped { attempts, reason, detail }) => {
                    report.skip(item, channel, reason, Some(format!("after {attempts} attempt(s): {detail}")));
                }
                Err(PipelineError::Cancelled) => {
                    report.cancelled = true;
                    report.skip(item, channel, ReasonCode::Cancelled, None);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => report.skip(item, channel, e.reason(), Some(e.to_string())),
            }
        }
        Ok(())
    }

    /// Seed the dedup ledger from the feed's newest posts. Store failures are
    /// fatal; a feed that cannot be listed is logged and skipped.
    pub async fn sync_feed(&self, limit: u32) -> Result<usize, PipelineError> {
        match self.dispatcher.sync_from_feed(limit).await {
            Err(e) if !e.is_fatal() => {
                tracing::warn!(target: "scheduler", error = %e, "feed sync skipped");
                Ok(0)
            }
            other => other,
        }
    }

    /// Run cycles every `interval` (first one immediately) until cancelled.
    /// Manual triggers start a cycle early.
    pub async fn run_continuous(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(
            target: "scheduler",
            interval_secs = self.settings.interval.as_secs(),
            channels = self.channels.len(),
            "continuous mode started"
        );

        loop {
            if let Some(wait) = self.backoff_remaining(Utc::now()) {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => self.leave_backoff(),
                }
            } else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    _ = self.trigger.notified() => {
                        tracing::info!(target: "scheduler", "manual trigger");
                    }
                }
            }

            match self.run_cycle(&cancel).await {
                Ok(CycleOutcome::Completed(_)) | Ok(CycleOutcome::Coalesced) => {}
                Ok(CycleOutcome::BackingOff { until }) => {
                    tracing::debug!(target: "scheduler", %until, "still backing off");
                }
                Err(e) => {
                    tracing::warn!(target: "scheduler", error = %e, "cycle failed, cooling down");
                }
            }
            if cancel.is_cancelled() {
                break;
            }
        }
        tracing::info!(target: "scheduler", "continuous mode stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{KeywordTable, ScoringConfig};
    use crate::ingest::providers::MockSource;
    use crate::publish::MockPublisher;
    use crate::retry::RetryPolicy;
    use crate::store::{MemoryDedupStore, QuotaLedger, WindowPolicy};
    use std::sync::Arc;

    fn scheduler(settings: SchedulerSettings) -> Scheduler {
        let ledger = Arc::new(QuotaLedger::in_memory(100, WindowPolicy::daily_at_hour_utc(0)));
        let poller = ChannelPoller::new(Arc::new(MockSource::new()), ledger, 1);
        let dispatcher = PublishDispatcher::new(
            Arc::new(MockPublisher::new()),
            Arc::new(MemoryDedupStore::new()),
            RetryPolicy::new(1, 0, 0),
            "c",
        );
        Scheduler::new(
            vec![Channel::new("UC1", "One", "misc")],
            poller,
            ScoringEngine::new(&KeywordTable::default(), ScoringConfig::default()),
            dispatcher,
            settings,
        )
    }

    #[tokio::test]
    async fn overlapping_request_is_coalesced() {
        let s = scheduler(SchedulerSettings::default());
        s.in_cycle.store(true, Ordering::SeqCst);
        let out = s.run_cycle(&CancellationToken::new()).await.unwrap();
        assert_eq!(out, CycleOutcome::Coalesced);
        assert!(!s.trigger());
    }

    #[tokio::test]
    async fn empty_cycle_returns_to_idle() {
        let s = scheduler(SchedulerSettings::default());
        let out = s.run_cycle(&CancellationToken::new()).await.unwrap();
        assert!(matches!(out, CycleOutcome::Completed(ref r) if r.channels_polled == 1));
        assert_eq!(s.state(), SchedulerState::Idle);
        assert!(!s.is_in_cycle());
        assert!(s.last_report().is_some());
    }

    fn assert_send<T: Send>(_: T) {}

    #[test]
    fn cycle_futures_can_be_spawned() {
        let s = scheduler(SchedulerSettings::default());
        let token = CancellationToken::new();
        assert_send(s.run_cycle(&token));
        assert_send(s.run_continuous(token.clone()));
        assert_send(s.sync_feed(10));
    }

    #[tokio::test]
    async fn run_continuous_runs_on_a_spawned_task() {
        let s = Arc::new(scheduler(SchedulerSettings::default()));
        let token = CancellationToken::new();
        let task = tokio::spawn({
            let s = s.clone();
            let token = token.clone();
            async move { s.run_continuous(token).await }
        });
        for _ in 0..200 {
            if s.last_report().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        task.await.unwrap();
        assert!(s.last_report().is_some());
    }

    #[test]
    fn state_serializes_with_tag() {
        let v = serde_json::to_value(SchedulerState::Idle).unwrap();
        assert_eq!(v["state"], "idle");
    }
}
