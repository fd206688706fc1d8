// src/config/mod.rs
//! Process configuration. Loaded once at start-up and treated as immutable.
//!
//! Resolution order for the main TOML file:
//! 1) explicit path (CLI `--config`)
//! 2) $BLUEFLAG_CONFIG
//! 3) config/blueflag.toml
//! 4) built-in defaults
//!
//! Selected fields can then be overridden from the environment (see
//! [`AppConfig::apply_env_overrides`]).

pub mod channels;
pub mod keywords;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::{env, fs};

pub use channels::{Channel, SecondaryTag};
pub use keywords::{Category, CategoryRule, KeywordTable};

pub const ENV_CONFIG_PATH: &str = "BLUEFLAG_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/blueflag.toml";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    pub interval_minutes: u64,
    pub lookback_hours: i64,
    pub poll_workers: usize,
    pub max_posts_per_run: usize,
    pub max_posts_per_hour: usize,
    pub max_posts_per_day: usize,
    pub time_between_posts_secs: u64,
    pub call_timeout_secs: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            interval_minutes: 30,
            lookback_hours: 24,
            poll_workers: 1,
            max_posts_per_run: 5,
            max_posts_per_hour: 20,
            max_posts_per_day: 100,
            time_between_posts_secs: 60,
            call_timeout_secs: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub ceiling: u64,
    pub window_hours: i64,
    /// Hour of day (UTC) at which the upstream budget resets.
    pub window_anchor_hour_utc: u32,
    pub units_per_poll: u64,
    pub state_path: PathBuf,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            ceiling: 10_000,
            window_hours: 24,
            window_anchor_hour_utc: 8,
            units_per_poll: 3,
            state_path: PathBuf::from("state/quota.json"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub path: PathBuf,
    /// Skip an item whose title fingerprint matches a record from the same
    /// channel published within this many hours. 0 disables the check.
    pub near_duplicate_hours: i64,
    /// Seed the ledger from the community's newest posts before the first cycle.
    pub sync_feed_on_start: bool,
    pub sync_feed_limit: u32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("state/published.jsonl"),
            near_duplicate_hours: 48,
            sync_feed_on_start: true,
            sync_feed_limit: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub base_score: i32,
    pub accept_threshold: i32,
    pub livestream_threshold: i32,
    pub livestream_bonus: i32,
    /// Share of a category weight granted when a keyword only hits the description.
    pub description_factor: f32,
    pub min_video_length_secs: u64,
    /// Highest tier whose `above` the view count exceeds wins.
    pub view_bonuses: Vec<ViewBonus>,
    /// Items older than `stale_after_hours` with fewer than `stale_min_views`
    /// views lose `stale_penalty`. Needs a known view count.
    pub stale_after_hours: i64,
    pub stale_min_views: u64,
    pub stale_penalty: i32,
    /// "stage" with "rally"/"wrc", or "special stage", in the title.
    pub rally_stage_bonus: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewBonus {
    pub above: u64,
    pub bonus: i32,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_score: 50,
            accept_threshold: 65,
            livestream_threshold: 60,
            livestream_bonus: 25,
            description_factor: 0.5,
            min_video_length_secs: 60,
            view_bonuses: vec![
                ViewBonus { above: 5_000, bonus: 5 },
                ViewBonus { above: 2_500, bonus: 3 },
                ViewBonus { above: 1_000, bonus: 1 },
            ],
            stale_after_hours: 24,
            stale_min_views: 500,
            stale_penalty: 10,
            rally_stage_bonus: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub dry_run: bool,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_secs: u64,
    pub factor: u32,
    pub max_secs: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_secs: 60,
            factor: 2,
            max_secs: 3_600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YouTubeConfig {
    /// "ENV" means: read from YOUTUBE_API_KEY.
    pub api_key: String,
    pub max_results: u32,
    pub base_url: String,
}

impl Default for YouTubeConfig {
    fn default() -> Self {
        Self {
            api_key: "ENV".to_string(),
            max_results: 10,
            base_url: "https://www.googleapis.com/youtube/v3".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LemmyConfig {
    pub instance: String,
    pub username: String,
    /// "ENV" means: read from LEMMY_PASSWORD.
    pub password: String,
    pub community: String,
}

impl Default for LemmyConfig {
    fn default() -> Self {
        Self {
            instance: "https://lemmy.world".to_string(),
            username: String::new(),
            password: "ENV".to_string(),
            community: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub bind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub channels_path: PathBuf,
    pub keywords_path: PathBuf,
    pub scan: ScanConfig,
    pub quota: QuotaConfig,
    pub dedup: DedupConfig,
    pub scoring: ScoringConfig,
    pub publish: PublishConfig,
    pub backoff: BackoffConfig,
    pub youtube: YouTubeConfig,
    pub lemmy: LemmyConfig,
    pub status: StatusConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channels_path: PathBuf::from("config/channels.json"),
            keywords_path: PathBuf::from("config/keywords.json"),
            scan: ScanConfig::default(),
            quota: QuotaConfig::default(),
            dedup: DedupConfig::default(),
            scoring: ScoringConfig::default(),
            publish: PublishConfig::default(),
            backoff: BackoffConfig::default(),
            youtube: YouTubeConfig::default(),
            lemmy: LemmyConfig::default(),
            status: StatusConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    /// Resolve the config file, apply env overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut cfg = match resolve_path(explicit)? {
            Some(p) => {
                tracing::info!(path = %p.display(), "loading config");
                Self::load_from(&p)?
            }
            None => {
                tracing::info!("no config file found, using defaults");
                Self::default()
            }
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Some(v) = env_str("LEMMY_INSTANCE") {
            self.lemmy.instance = v;
        }
        if let Some(v) = env_str("LEMMY_USERNAME") {
            self.lemmy.username = v;
        }
        if let Some(v) = env_str("LEMMY_PASSWORD") {
            self.lemmy.password = v;
        }
        if let Some(v) = env_str("LEMMY_COMMUNITY") {
            self.lemmy.community = v;
        }
        if let Some(v) = env_str("YOUTUBE_API_KEY") {
            self.youtube.api_key = v;
        }
        if let Some(v) = env_parse::<u64>("YOUTUBE_API_QUOTA")? {
            self.quota.ceiling = v;
        }
        if let Some(v) = env_parse::<u64>("SCAN_INTERVAL")? {
            self.scan.interval_minutes = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_POSTS_PER_RUN")? {
            self.scan.max_posts_per_run = v;
        }
        if let Some(v) = env_parse::<usize>("MAX_POSTS_PER_DAY")? {
            self.scan.max_posts_per_day = v;
        }
        if let Some(v) = env_str("BLUEFLAG_DRY_RUN") {
            self.publish.dry_run = matches!(
                v.to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.quota.ceiling == 0 {
            bail!("quota.ceiling must be > 0");
        }
        if self.quota.units_per_poll > self.quota.ceiling {
            bail!(
                "quota.units_per_poll ({}) exceeds quota.ceiling ({})",
                self.quota.units_per_poll,
                self.quota.ceiling
            );
        }
        if self.quota.window_hours <= 0 {
            bail!("quota.window_hours must be > 0");
        }
        if self.quota.window_anchor_hour_utc > 23 {
            bail!("quota.window_anchor_hour_utc must be within 0..=23");
        }
        if self.scan.poll_workers == 0 {
            bail!("scan.poll_workers must be >= 1");
        }
        if self.scan.interval_minutes == 0 {
            bail!("scan.interval_minutes must be >= 1");
        }
        if self.publish.max_attempts == 0 {
            bail!("publish.max_attempts must be >= 1");
        }
        if self.dedup.near_duplicate_hours < 0 {
            bail!("dedup.near_duplicate_hours must be >= 0");
        }
        if self.scoring.stale_after_hours < 0 {
            bail!("scoring.stale_after_hours must be >= 0");
        }
        if !(0.0..=1.0).contains(&self.scoring.description_factor) {
            bail!("scoring.description_factor must be within 0.0..=1.0");
        }
        for (name, v) in [
            ("accept_threshold", self.scoring.accept_threshold),
            ("livestream_threshold", self.scoring.livestream_threshold),
        ] {
            if !(0..=100).contains(&v) {
                bail!("scoring.{name} must be within 0..=100");
            }
        }
        Ok(())
    }

    pub fn load_channels(&self) -> Result<Vec<Channel>> {
        channels::load_channels_from(&self.channels_path)
    }

    pub fn load_keywords(&self) -> Result<KeywordTable> {
        KeywordTable::load_from(&self.keywords_path)
    }

    /// YouTube key with "ENV" resolved.
    pub fn youtube_api_key(&self) -> Result<String> {
        resolve_secret(&self.youtube.api_key, "YOUTUBE_API_KEY")
    }

    /// Lemmy password with "ENV" resolved.
    pub fn lemmy_password(&self) -> Result<String> {
        resolve_secret(&self.lemmy.password, "LEMMY_PASSWORD")
    }
}

fn resolve_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
    if let Some(p) = explicit {
        if !p.exists() {
            return Err(anyhow!("config file {} does not exist", p.display()));
        }
        return Ok(Some(p.to_path_buf()));
    }
    if let Ok(p) = env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(Some(pb));
        }
        return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    Ok(default.exists().then_some(default))
}

fn resolve_secret(value: &str, var: &str) -> Result<String> {
    if value.trim().eq_ignore_ascii_case("env") {
        env::var(var).map_err(|_| anyhow!("Missing {var} env var"))
    } else {
        Ok(value.to_string())
    }
}

fn env_str(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(var: &str) -> Result<Option<T>> {
    match env_str(var) {
        Some(v) => v
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| anyhow!("{var}={v:?} is not a valid number")),
        None => Ok(None),
    }
}
