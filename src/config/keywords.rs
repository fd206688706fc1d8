// src/config/keywords.rs
//! Weighted keyword categories, loaded from `config/keywords.json`.
//!
//! JSON shape:
//! {
//!   "auto_reject":      { "keywords": ["reaction", "prank"] },
//!   "race_content":     { "weight": 15, "keywords": ["race", "qualifying"] },
//!   "analysis_content": { "weight": 8,  "keywords": ["analysis"] },
//!   "quality_boosters": { "weight": 10, "keywords": ["onboard"] },
//!   "warning_signs":    { "weight": 15, "keywords": ["clickbait"] }
//! }
//!
//! Weights are magnitudes. `warning_signs` is always subtracted.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    AutoReject,
    RaceContent,
    AnalysisContent,
    QualityBoosters,
    WarningSigns,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoReject => "auto_reject",
            Self::RaceContent => "race_content",
            Self::AnalysisContent => "analysis_content",
            Self::QualityBoosters => "quality_boosters",
            Self::WarningSigns => "warning_signs",
        }
    }

    /// +1 for categories that raise the score, -1 for ones that lower it.
    pub fn sign(&self) -> i32 {
        match self {
            Self::WarningSigns => -1,
            _ => 1,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryRule {
    pub weight: i32,
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl CategoryRule {
    fn with_weight(weight: i32) -> Self {
        Self {
            weight,
            keywords: Vec::new(),
        }
    }
}

const RACE_WEIGHT: i32 = 15;
const ANALYSIS_WEIGHT: i32 = 8;
const QUALITY_WEIGHT: i32 = 10;
const WARNING_WEIGHT: i32 = 15;

/// On-disk shape: every category and every weight is optional.
#[derive(Debug, Default, Deserialize)]
struct KeywordFile {
    #[serde(default)]
    auto_reject: Option<RuleFile>,
    #[serde(default)]
    race_content: Option<RuleFile>,
    #[serde(default)]
    analysis_content: Option<RuleFile>,
    #[serde(default)]
    quality_boosters: Option<RuleFile>,
    #[serde(default)]
    warning_signs: Option<RuleFile>,
}

#[derive(Debug, Default, Deserialize)]
struct RuleFile {
    #[serde(default)]
    weight: Option<i32>,
    #[serde(default)]
    keywords: Vec<String>,
}

fn resolve(rule: Option<RuleFile>, default_weight: i32) -> CategoryRule {
    let rule = rule.unwrap_or_default();
    CategoryRule {
        weight: rule.weight.unwrap_or(default_weight),
        keywords: rule.keywords,
    }
}

impl From<KeywordFile> for KeywordTable {
    fn from(f: KeywordFile) -> Self {
        let mut table = Self {
            auto_reject: resolve(f.auto_reject, 0),
            race_content: resolve(f.race_content, RACE_WEIGHT),
            analysis_content: resolve(f.analysis_content, ANALYSIS_WEIGHT),
            quality_boosters: resolve(f.quality_boosters, QUALITY_WEIGHT),
            warning_signs: resolve(f.warning_signs, WARNING_WEIGHT),
        };
        table.sanitize();
        table
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "KeywordFile")]
pub struct KeywordTable {
    pub auto_reject: CategoryRule,
    pub race_content: CategoryRule,
    pub analysis_content: CategoryRule,
    pub quality_boosters: CategoryRule,
    pub warning_signs: CategoryRule,
}

impl Default for KeywordTable {
    fn default() -> Self {
        Self {
            auto_reject: CategoryRule::default(),
            race_content: CategoryRule::with_weight(RACE_WEIGHT),
            analysis_content: CategoryRule::with_weight(ANALYSIS_WEIGHT),
            quality_boosters: CategoryRule::with_weight(QUALITY_WEIGHT),
            warning_signs: CategoryRule::with_weight(WARNING_WEIGHT),
        }
    }
}

impl KeywordTable {
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading keyword table from {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("parsing keyword table {}", path.display()))
    }

    /// Categories that add to (or subtract from) the score, in evaluation order.
    pub fn weighted(&self) -> [(Category, &CategoryRule); 4] {
        [
            (Category::RaceContent, &self.race_content),
            (Category::AnalysisContent, &self.analysis_content),
            (Category::QualityBoosters, &self.quality_boosters),
            (Category::WarningSigns, &self.warning_signs),
        ]
    }

    /// Trim keywords, drop blanks, force magnitudes non-negative.
    fn sanitize(&mut self) {
        for rule in [
            &mut self.auto_reject,
            &mut self.race_content,
            &mut self.analysis_content,
            &mut self.quality_boosters,
            &mut self.warning_signs,
        ] {
            rule.weight = rule.weight.abs();
            rule.keywords = rule
                .keywords
                .iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_weights_fall_back_to_defaults() {
        let json = r#"{
            "auto_reject": { "keywords": ["prank"] },
            "race_content": { "keywords": [" race ", ""] },
            "warning_signs": { "weight": -20, "keywords": ["clickbait"] }
        }"#;
        let t: KeywordTable = serde_json::from_str(json).unwrap();
        assert_eq!(t.race_content.weight, 15);
        assert_eq!(t.race_content.keywords, vec!["race".to_string()]);
        assert_eq!(t.analysis_content.weight, 8);
        assert_eq!(t.quality_boosters.weight, 10);
        assert_eq!(t.warning_signs.weight, 20);
        assert_eq!(Category::WarningSigns.sign(), -1);
    }

    #[test]
    fn category_present_without_weight_keeps_its_own_default() {
        let t: KeywordTable = serde_json::from_str(
            r#"{
                "race_content": { "keywords": ["race"] },
                "analysis_content": { "keywords": ["analysis"] },
                "quality_boosters": { "keywords": ["onboard"] },
                "warning_signs": { "keywords": ["clickbait"] }
            }"#,
        )
        .unwrap();
        assert_eq!(t.race_content.weight, 15);
        assert_eq!(t.analysis_content.weight, 8);
        assert_eq!(t.quality_boosters.weight, 10);
        assert_eq!(t.warning_signs.weight, 15);
    }

    #[test]
    fn explicit_zero_weight_is_kept() {
        let t: KeywordTable =
            serde_json::from_str(r#"{ "race_content": { "weight": 0, "keywords": ["race"] } }"#).unwrap();
        assert_eq!(t.race_content.weight, 0);
    }

    #[test]
    fn empty_object_equals_default_table() {
        let t: KeywordTable = serde_json::from_str("{}").unwrap();
        assert_eq!(t, KeywordTable::default());
    }
}
