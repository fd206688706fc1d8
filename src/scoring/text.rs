// src/scoring/text.rs
//! Matching normalization: case-fold, punctuation to spaces, collapsed runs.
//!
//! Matching is phrase-on-token-boundaries: "race" hits "Race day!" but not
//! "embraced". Both sides go through [`fold`] so multi-word keywords like
//! "formula 1" match "Formula-1" too.

/// Lowercase, replace every non-alphanumeric char with a space, collapse runs.
pub fn fold(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_space = false;
    for ch in s.chars() {
        if ch.is_alphanumeric() {
            if pending_space && !out.is_empty() {
                out.push(' ');
            }
            pending_space = false;
            out.extend(ch.to_lowercase());
        } else {
            pending_space = true;
        }
    }
    out
}

/// Folded text padded with a space on both ends, ready for phrase lookups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folded(String);

impl Folded {
    pub fn new(s: &str) -> Self {
        Self(format!(" {} ", fold(s)))
    }

    /// `phrase` must already be folded (see [`fold`]).
    pub fn contains(&self, phrase: &str) -> bool {
        if phrase.is_empty() {
            return false;
        }
        self.0.contains(&format!(" {phrase} "))
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

/// Words too generic to tell two uploads from the same channel apart.
const TITLE_NOISE: &[&str] = &[
    "highlights", "race", "qualifying", "practice", "session", "live", "full", "rally", "stage",
    "wrc", "special",
];

/// Order-insensitive fingerprint of a title: folded words minus generic
/// series vocabulary, sorted. Re-uploads and reworded repeats collide.
pub fn title_key(title: &str) -> String {
    let folded = fold(title);
    let mut words: Vec<&str> = folded
        .split(' ')
        .filter(|w| !w.is_empty() && !TITLE_NOISE.contains(w))
        .collect();
    words.sort_unstable();
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fold_strips_punctuation() {
        assert_eq!(fold("  Formula-1: QUALIFYING!! "), "formula 1 qualifying");
        assert_eq!(fold("Él ganó"), "él ganó");
        assert_eq!(fold("!!!"), "");
    }

    #[test]
    fn phrase_match_respects_token_boundaries() {
        let t = Folded::new("He embraced the Race-day chaos");
        assert!(t.contains("race"));
        assert!(t.contains("race day"));
        assert!(!t.contains("brace"));
        assert!(!t.contains(""));
    }

    #[test]
    fn title_key_ignores_order_punctuation_and_noise() {
        assert_eq!(
            title_key("Verstappen wins in Bahrain | Race Highlights"),
            title_key("HIGHLIGHTS: Bahrain - Verstappen wins in")
        );
        assert_eq!(title_key("Race highlights"), "");
        assert_ne!(title_key("Bahrain highlights"), title_key("Jeddah highlights"));
    }
}
