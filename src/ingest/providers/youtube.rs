// src/ingest/providers/youtube.rs
//! YouTube Data API v3 lookup: channel → uploads playlist → video details.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::error::PipelineError;
use crate::ingest::types::{Availability, RawItem, VideoSource};

pub struct YouTubeSource {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    max_results: u32,
    /// channel id → uploads playlist id
    uploads: Mutex<HashMap<String, String>>,
}

impl YouTubeSource {
    pub fn new(api_key: String, base_url: &str, max_results: u32) -> Result<Self, PipelineError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("blueflag/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| PipelineError::SourceUnavailable(format!("http client: {e}")))?;
        Ok(Self {
            http,
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
            max_results: max_results.clamp(1, 50),
            uploads: Mutex::new(HashMap::new()),
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PipelineError> {
        let url = format!("{}/{endpoint}", self.base_url);
        let rsp = self
            .http
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("youtube {endpoint}: {e}")))?;

        let status = rsp.status();
        if !status.is_success() {
            let body = rsp.text().await.unwrap_or_default();
            return Err(classify_failure(status, &body, endpoint));
        }
        rsp.json::<T>()
            .await
            .map_err(|e| PipelineError::SourceUnavailable(format!("youtube {endpoint} body: {e}")))
    }

    async fn uploads_playlist(&self, channel_id: &str) -> Result<Option<String>, PipelineError> {
        if let Some(p) = self.cached_playlist(channel_id) {
            return Ok(Some(p));
        }
        let rsp: ListResponse<ChannelResource> = self
            .get("channels", &[("part", "contentDetails"), ("id", channel_id)])
            .await?;
        let playlist = rsp
            .items
            .into_iter()
            .next()
            .map(|c| c.content_details.related_playlists.uploads);
        if let Some(p) = &playlist {
            if let Ok(mut g) = self.uploads.lock() {
                g.insert(channel_id.to_string(), p.clone());
            }
        }
        Ok(playlist)
    }

    fn cached_playlist(&self, channel_id: &str) -> Option<String> {
        self.uploads.lock().ok()?.get(channel_id).cloned()
    }
}

#[async_trait]
impl VideoSource for YouTubeSource {
    async fn fetch_recent_items(
        &self,
        channel_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<RawItem>, PipelineError> {
        let Some(playlist) = self.uploads_playlist(channel_id).await? else {
            tracing::warn!(target: "ingest", channel = channel_id, "channel not found");
            return Ok(Vec::new());
        };

        let max = self.max_results.to_string();
        let page: ListResponse<PlaylistItem> = self
            .get(
                "playlistItems",
                &[
                    ("part", "snippet"),
                    ("playlistId", playlist.as_str()),
                    ("maxResults", max.as_str()),
                ],
            )
            .await?;

        // Live/premiere entries can carry an old publishedAt; keep anything
        // whose title hints at a broadcast and let the details call decide.
        let ids: Vec<String> = page
            .items
            .into_iter()
            .filter(|it| it.snippet.published_at >= since || it.snippet.title.to_uppercase().contains("LIVE"))
            .map(|it| it.snippet.resource_id.video_id)
            .collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let joined = ids.join(",");
        let details: ListResponse<VideoResource> = self
            .get(
                "videos",
                &[
                    ("part", "snippet,statistics,contentDetails,liveStreamingDetails"),
                    ("id", joined.as_str()),
                ],
            )
            .await?;

        let items = details
            .items
            .into_iter()
            .map(VideoResource::into_raw)
            .filter(|r| r.availability != Availability::Available || r.published_at >= since)
            .collect();
        Ok(items)
    }

    fn name(&self) -> &'static str {
        "youtube"
    }
}

fn classify_failure(status: StatusCode, body: &str, endpoint: &str) -> PipelineError {
    let quota_hit = body.contains("quotaExceeded") || body.contains("rateLimitExceeded");
    if status == StatusCode::TOO_MANY_REQUESTS || (status == StatusCode::FORBIDDEN && quota_hit) {
        return PipelineError::RateLimited;
    }
    let snippet: String = body.chars().take(200).collect();
    PipelineError::SourceUnavailable(format!("youtube {endpoint}: HTTP {status}: {snippet}"))
}

static RE_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$").expect("valid regex")
});

/// ISO 8601 duration ("PT1H2M3S") to seconds. Live broadcasts report "P0D".
pub fn parse_iso8601_duration(s: &str) -> Option<u64> {
    let caps = RE_DURATION.captures(s.trim())?;
    let part = |i: usize| -> u64 {
        caps.get(i)
            .and_then(|m| m.as_str().parse::<u64>().ok())
            .unwrap_or(0)
    };
    Some(part(1) * 86_400 + part(2) * 3_600 + part(3) * 60 + part(4))
}

// --- wire types ---

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelResource {
    content_details: ChannelContentDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelContentDetails {
    related_playlists: RelatedPlaylists,
}

#[derive(Debug, Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Debug, Deserialize)]
struct PlaylistItem {
    snippet: PlaylistSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaylistSnippet {
    published_at: DateTime<Utc>,
    #[serde(default)]
    title: String,
    resource_id: ResourceId,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResourceId {
    video_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoResource {
    id: String,
    snippet: VideoSnippet,
    #[serde(default)]
    statistics: Option<VideoStatistics>,
    #[serde(default)]
    content_details: Option<VideoContentDetails>,
    #[serde(default)]
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    published_at: DateTime<Utc>,
    channel_id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    live_broadcast_content: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    #[serde(default)]
    view_count: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideoContentDetails {
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    #[serde(default)]
    actual_start_time: Option<DateTime<Utc>>,
    #[serde(default)]
    actual_end_time: Option<DateTime<Utc>>,
    #[serde(default)]
    scheduled_start_time: Option<DateTime<Utc>>,
}

impl VideoResource {
    fn availability(&self) -> Availability {
        match self.snippet.live_broadcast_content.as_deref() {
            Some("live") => return Availability::Live,
            Some("upcoming") => return Availability::Upcoming,
            _ => {}
        }
        match &self.live_streaming_details {
            Some(d) if d.actual_start_time.is_some() && d.actual_end_time.is_none() => {
                Availability::Live
            }
            Some(d) if d.scheduled_start_time.is_some() && d.actual_start_time.is_none() => {
                Availability::Upcoming
            }
            _ => Availability::Available,
        }
    }

    fn into_raw(self) -> RawItem {
        let availability = self.availability();
        let duration_secs = self
            .content_details
            .as_ref()
            .and_then(|c| c.duration.as_deref())
            .and_then(parse_iso8601_duration)
            .filter(|secs| *secs > 0);
        let view_count = self
            .statistics
            .as_ref()
            .and_then(|s| s.view_count.as_deref())
            .and_then(|v| v.parse().ok());
        RawItem {
            url: Some(format!("https://www.youtube.com/watch?v={}", self.id)),
            item_id: self.id,
            channel_id: self.snippet.channel_id,
            title: self.snippet.title,
            description: self.snippet.description,
            published_at: self.snippet.published_at,
            availability,
            duration_secs,
            view_count,
        }
    }
}
