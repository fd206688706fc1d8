// src/config/channels.rs
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::{fs, path::Path};

/// A keyword-triggered override of the channel's primary tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondaryTag {
    pub tag: String,
    /// Empty means the tag name itself is the trigger.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl SecondaryTag {
    pub fn triggers(&self) -> Vec<&str> {
        if self.keywords.is_empty() {
            vec![self.tag.as_str()]
        } else {
            self.keywords.iter().map(String::as_str).collect()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: String,
    pub name: String,
    pub primary_tag: String,
    /// Order matters: the first matching secondary tag wins.
    #[serde(default)]
    pub secondary_tags: Vec<SecondaryTag>,
}

impl Channel {
    pub fn new(id: impl Into<String>, name: impl Into<String>, primary_tag: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            primary_tag: primary_tag.into(),
            secondary_tags: Vec::new(),
        }
    }

    pub fn with_secondary(mut self, tag: &str, keywords: &[&str]) -> Self {
        self.secondary_tags.push(SecondaryTag {
            tag: tag.to_string(),
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        });
        self
    }
}

pub fn load_channels_from(path: &Path) -> Result<Vec<Channel>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading channel table from {}", path.display()))?;
    parse_channels(&content).with_context(|| format!("parsing channel table {}", path.display()))
}

pub fn parse_channels(s: &str) -> Result<Vec<Channel>> {
    let mut channels: Vec<Channel> = serde_json::from_str(s)?;
    let mut seen = HashSet::new();
    for ch in &mut channels {
        ch.id = ch.id.trim().to_string();
        ch.primary_tag = ch.primary_tag.trim().to_string();
        if ch.id.is_empty() {
            bail!("channel {:?} has an empty id", ch.name);
        }
        if ch.primary_tag.is_empty() {
            bail!("channel {} has an empty primary_tag", ch.id);
        }
        if !seen.insert(ch.id.clone()) {
            bail!("channel {} is configured twice", ch.id);
        }
        ch.secondary_tags.retain(|t| !t.tag.trim().is_empty());
    }
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_keeps_secondary_order() {
        let json = r#"[
            {"id":"UC1","name":"WRC","primary_tag":"WRC",
             "secondary_tags":[{"tag":"WRC2","keywords":["wrc2","wrc 2"]},{"tag":"JWRC"}]}
        ]"#;
        let chans = parse_channels(json).unwrap();
        assert_eq!(chans.len(), 1);
        assert_eq!(chans[0].secondary_tags[0].tag, "WRC2");
        assert_eq!(chans[0].secondary_tags[1].triggers(), vec!["JWRC"]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let json = r#"[
            {"id":"UC1","name":"a","primary_tag":"F1"},
            {"id":" UC1 ","name":"b","primary_tag":"F1"}
        ]"#;
        assert!(parse_channels(json).is_err());
    }

    #[test]
    fn blank_primary_tag_is_rejected() {
        let json = r#"[{"id":"UC1","name":"a","primary_tag":"  "}]"#;
        assert!(parse_channels(json).is_err());
    }
}
