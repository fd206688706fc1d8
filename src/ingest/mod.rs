// src/ingest/mod.rs
//! Discovery side of the pipeline: turns one channel into a list of
//! normalized candidates, gated by the shared quota ledger.

pub mod providers;
pub mod types;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Channel;
use crate::error::PipelineError;
use crate::store::QuotaLedger;
use types::{Candidate, RawItem, VideoSource};

pub use types::Availability;

const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("valid regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Display normalization: decode entities, strip markup, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s).to_string();
    let stripped = RE_TAGS.replace_all(&decoded, "");
    let out = stripped
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");
    let out = RE_WS.replace_all(&out, " ");
    let out = out.trim();

    // Length cap: 5000 chars (upstream description limit)
    if out.chars().count() > 5000 {
        out.chars().take(5000).collect()
    } else {
        out.to_string()
    }
}

pub fn candidate_from_raw(raw: RawItem) -> Candidate {
    let item_id = raw.item_id.trim().to_string();
    let url = raw
        .url
        .filter(|u| !u.trim().is_empty())
        .unwrap_or_else(|| format!("{WATCH_URL}{item_id}"));
    Candidate {
        item_id,
        channel_id: raw.channel_id,
        title: normalize_text(&raw.title),
        description: normalize_text(&raw.description),
        published_at: raw.published_at,
        url,
        availability: raw.availability,
        duration_secs: raw.duration_secs,
        view_count: raw.view_count,
    }
}

/// Video id behind a YouTube link, for seeding dedup from existing feed posts.
/// Handles `watch?v=`, `youtu.be/`, `/shorts/`, `/live/` and `/embed/` forms.
pub fn extract_video_id(link: &str) -> Option<String> {
    let url = reqwest::Url::parse(link.trim()).ok()?;
    let host = url.host_str()?.trim_start_matches("www.").trim_start_matches("m.");
    let id = match host {
        "youtu.be" => url.path_segments()?.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" => {
            let mut segs = url.path_segments()?;
            match segs.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("shorts" | "live" | "embed") => segs.next().map(str::to_string),
                _ => None,
            }
        }
        _ => None,
    }?;
    let id = id.trim();
    (!id.is_empty()).then(|| id.to_string())
}

/// Quota-gated wrapper around the lookup collaborator.
pub struct ChannelPoller {
    source: Arc<dyn VideoSource>,
    ledger: Arc<QuotaLedger>,
    units_per_poll: u64,
    call_timeout: Duration,
    lookback: ChronoDuration,
}

impl ChannelPoller {
    pub fn new(source: Arc<dyn VideoSource>, ledger: Arc<QuotaLedger>, units_per_poll: u64) -> Self {
        Self {
            source,
            ledger,
            units_per_poll,
            call_timeout: Duration::from_secs(20),
            lookback: ChronoDuration::hours(24),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_lookback_hours(mut self, hours: i64) -> Self {
        self.lookback = ChronoDuration::hours(hours.max(1));
        self
    }

    pub fn ledger(&self) -> &Arc<QuotaLedger> {
        &self.ledger
    }

    pub async fn poll(&self, channel: &Channel) -> Result<Vec<Candidate>, PipelineError> {
        self.poll_at(channel, Utc::now()).await
    }

    /// Reserve quota, then fetch. A refused reservation never reaches the source.
    pub async fn poll_at(
        &self,
        channel: &Channel,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, PipelineError> {
        if !self.ledger.reserve_at(self.units_per_poll, now)? {
            counter!("blueflag_polls_total", "outcome" => "quota_exhausted").increment(1);
            return Err(PipelineError::QuotaExhausted {
                needed: self.units_per_poll,
                remaining: self.ledger.window_remaining_at(now),
            });
        }

        let since = now - self.lookback;
        let fetched = tokio::time::timeout(
            self.call_timeout,
            self.source.fetch_recent_items(&channel.id, since),
        )
        .await;

        let raw = match fetched {
            Ok(Ok(items)) => items,
            Ok(Err(e)) => {
                counter!("blueflag_polls_total", "outcome" => e.reason().as_str()).increment(1);
                return Err(e);
            }
            Err(_) => {
                counter!("blueflag_polls_total", "outcome" => "timeout").increment(1);
                return Err(PipelineError::SourceUnavailable(format!(
                    "{} timed out after {}s",
                    self.source.name(),
                    self.call_timeout.as_secs()
                )));
            }
        };
        counter!("blueflag_polls_total", "outcome" => "ok").increment(1);

        let candidates: Vec<Candidate> = raw
            .into_iter()
            .filter(|r| !r.item_id.trim().is_empty())
            .map(candidate_from_raw)
            .collect();

        tracing::debug!(
            target: "ingest",
            channel = %channel.id,
            source = self.source.name(),
            candidates = candidates.len(),
            "channel polled"
        );
        Ok(candidates)
    }
}
