// src/scoring/tags.rs
use super::text::{fold, Folded};
use crate::config::Channel;

/// Effective tag for an item: the first secondary tag (in configured order)
/// with any matching trigger, otherwise the channel's primary tag.
pub fn resolve_tag<'a>(channel: &'a Channel, text: &Folded) -> &'a str {
    channel
        .secondary_tags
        .iter()
        .find(|st| st.triggers().into_iter().any(|kw| text.contains(&fold(kw))))
        .map(|st| st.tag.as_str())
        .unwrap_or(channel.primary_tag.as_str())
}
