// src/scoring/mod.rs
//! Weighted keyword scoring and accept/reject/defer decisions.
//!
//! [`ScoringEngine::score_at`] is pure: the engine holds only the keyword
//! table (pre-folded at construction) and thresholds, and the evaluation
//! time is an argument, so identical inputs always give identical results
//! and candidates can be scored concurrently.

pub mod tags;
pub mod text;

use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;

use crate::config::{Category, Channel, KeywordTable, ScoringConfig};
use crate::error::ReasonCode;
use crate::ingest::types::Candidate;
use text::{fold, Folded};

pub use tags::resolve_tag;

static RE_SHORTS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)#(?:youtube)?shorts?\b").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Reject,
    /// Not airable yet; re-scored on a later cycle.
    Defer,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Reject => "reject",
            Self::Defer => "defer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScoreResult {
    pub score: i32,
    pub decision: Decision,
    pub tag: String,
    /// Set whenever the decision is not `Accept`.
    pub reason: Option<ReasonCode>,
    /// `category:keyword` for every keyword that contributed.
    pub matched: Vec<String>,
}

impl ScoreResult {
    pub fn is_accepted(&self) -> bool {
        self.decision == Decision::Accept
    }
}

#[derive(Debug, Clone)]
struct CompiledCategory {
    category: Category,
    weight: i32,
    keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ScoringEngine {
    auto_reject: Vec<String>,
    weighted: Vec<CompiledCategory>,
    cfg: ScoringConfig,
}

pub const MIN_SCORE: i32 = 0;
pub const MAX_SCORE: i32 = 100;

/// Folded, non-empty, first occurrence only.
fn compile(keywords: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    keywords
        .iter()
        .map(|k| fold(k))
        .filter(|k| !k.is_empty() && seen.insert(k.clone()))
        .collect()
}

impl ScoringEngine {
    pub fn new(table: &KeywordTable, cfg: ScoringConfig) -> Self {
        let weighted = table
            .weighted()
            .into_iter()
            .map(|(category, rule)| CompiledCategory {
                category,
                weight: rule.weight.abs() * category.sign(),
                keywords: compile(&rule.keywords),
            })
            .collect();
        Self {
            auto_reject: compile(&table.auto_reject.keywords),
            weighted,
            cfg,
        }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.cfg
    }

    pub fn score(&self, candidate: &Candidate, channel: &Channel) -> ScoreResult {
        self.score_at(candidate, channel, Utc::now())
    }

    /// Score as of `now`, which only feeds the age penalty.
    pub fn score_at(&self, candidate: &Candidate, channel: &Channel, now: DateTime<Utc>) -> ScoreResult {
        let title = Folded::new(&candidate.title);
        let description = Folded::new(&candidate.description);
        let all = Folded::new(&format!("{} {}", candidate.title, candidate.description));
        let tag = resolve_tag(channel, &all).to_string();

        let auto_hit = self
            .auto_reject
            .iter()
            .find(|kw| title.contains(kw) || description.contains(kw));

        let (score, matched) = match auto_hit {
            Some(kw) => (MIN_SCORE, vec![format!("{}:{kw}", Category::AutoReject.as_str())]),
            None => {
                let (score, mut matched) = self.weighted_score(&title, &description);
                let adjusted = score + self.adjustments(candidate, &title, now, &mut matched);
                (adjusted.clamp(MIN_SCORE, MAX_SCORE), matched)
            }
        };

        let (decision, reason) = self.decide(candidate, score, auto_hit.is_some());
        ScoreResult {
            score,
            decision,
            tag,
            reason,
            matched,
        }
    }

    /// Base score plus keyword contributions, unclamped.
    fn weighted_score(&self, title: &Folded, description: &Folded) -> (i32, Vec<String>) {
        let mut score = self.cfg.base_score;
        let mut matched = Vec::new();
        for cat in &self.weighted {
            for kw in &cat.keywords {
                let delta = if title.contains(kw) {
                    cat.weight
                } else if !description.is_blank() && description.contains(kw) {
                    (cat.weight as f32 * self.cfg.description_factor).round() as i32
                } else {
                    continue;
                };
                score += delta;
                matched.push(format!("{}:{kw}", cat.category.as_str()));
            }
        }
        (score, matched)
    }

    /// Popularity, age, livestream and rally-stage terms.
    fn adjustments(&self, c: &Candidate, title: &Folded, now: DateTime<Utc>, matched: &mut Vec<String>) -> i32 {
        let mut delta = 0;
        if let Some(views) = c.view_count {
            let tier = self
                .cfg
                .view_bonuses
                .iter()
                .filter(|t| views > t.above)
                .max_by_key(|t| t.above);
            if let Some(t) = tier {
                delta += t.bonus;
                matched.push(format!("views:>{}", t.above));
            }
            let stale = now - c.published_at > Duration::hours(self.cfg.stale_after_hours);
            if stale && views < self.cfg.stale_min_views {
                delta -= self.cfg.stale_penalty;
                matched.push("penalty:stale".to_string());
            }
        }
        if c.is_live() {
            delta += self.cfg.livestream_bonus;
        }
        let rally_stage = (title.contains("stage") && (title.contains("rally") || title.contains("wrc")))
            || title.contains("special stage");
        if rally_stage && self.cfg.rally_stage_bonus != 0 {
            delta += self.cfg.rally_stage_bonus;
            matched.push("bonus:rally_stage".to_string());
        }
        delta
    }

    fn decide(&self, c: &Candidate, score: i32, auto_rejected: bool) -> (Decision, Option<ReasonCode>) {
        if c.is_upcoming() {
            return (Decision::Defer, Some(ReasonCode::Upcoming));
        }
        if auto_rejected {
            return (Decision::Reject, Some(ReasonCode::AutoReject));
        }
        if self.is_short(c) {
            return (Decision::Reject, Some(ReasonCode::ShortVideo));
        }
        let threshold = if c.is_live() {
            self.cfg.livestream_threshold
        } else {
            self.cfg.accept_threshold
        };
        if score >= threshold {
            (Decision::Accept, None)
        } else {
            (Decision::Reject, Some(ReasonCode::BelowThreshold))
        }
    }

    fn is_short(&self, c: &Candidate) -> bool {
        if RE_SHORTS.is_match(&c.title) {
            return true;
        }
        !c.is_live()
            && c.duration_secs
                .is_some_and(|d| d < self.cfg.min_video_length_secs)
    }
}
