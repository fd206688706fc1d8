// tests/scoring_rules.rs
//
// Scoring engine behaviour through the public API: determinism, auto-reject
// precedence, first-match tag resolution, upcoming deferral, threshold.

use blueflag::config::{CategoryRule, ScoringConfig};
use blueflag::ingest::candidate_from_raw;
use blueflag::ingest::types::{Availability, Candidate, RawItem};
use blueflag::scoring::{Decision, ScoringEngine};
use blueflag::{Channel, KeywordTable, ReasonCode};

fn rule(weight: i32, kws: &[&str]) -> CategoryRule {
    CategoryRule {
        weight,
        keywords: kws.iter().map(|s| s.to_string()).collect(),
    }
}

fn engine() -> ScoringEngine {
    let table = KeywordTable {
        auto_reject: rule(0, &["reaction", "podcast"]),
        race_content: rule(15, &["race", "qualifying", "highlights"]),
        analysis_content: rule(8, &["analysis"]),
        quality_boosters: rule(10, &["official"]),
        warning_signs: rule(15, &["rumour"]),
    };
    ScoringEngine::new(&table, ScoringConfig::default())
}

fn channel() -> Channel {
    Channel::new("UC1", "Motorsport", "motorsport")
        .with_secondary("rally", &["rally"])
        .with_secondary("f1", &["formula 1"])
}

fn candidate(title: &str) -> Candidate {
    candidate_from_raw(RawItem::new("vid", "UC1", title))
}

#[test]
fn scoring_is_deterministic() {
    let e = engine();
    let c = candidate_from_raw(
        RawItem::new("vid", "UC1", "Official qualifying highlights")
            .with_description("Race analysis with the rumour mill"),
    );
    let first = e.score(&c, &channel());
    for _ in 0..20 {
        assert_eq!(e.score(&c, &channel()), first);
    }
}

#[test]
fn auto_reject_beats_every_positive_match() {
    let r = engine().score(
        &candidate("Official race qualifying highlights analysis reaction"),
        &channel(),
    );
    assert_eq!(r.decision, Decision::Reject);
    assert_eq!(r.reason, Some(ReasonCode::AutoReject));
    assert_eq!(r.score, 0);
}

#[test]
fn first_secondary_tag_wins() {
    let r = engine().score(&candidate("Rally and Formula 1 highlights"), &channel());
    assert_eq!(r.tag, "rally");
}

#[test]
fn primary_tag_when_nothing_matches() {
    let r = engine().score(&candidate("Race highlights"), &channel());
    assert_eq!(r.tag, "motorsport");
}

#[test]
fn upcoming_is_deferred_then_scored_normally() {
    let e = engine();
    let raw = RawItem::new("vid", "UC1", "Official race highlights");

    let upcoming = candidate_from_raw(raw.clone().with_availability(Availability::Upcoming));
    let r = e.score(&upcoming, &channel());
    assert_eq!(r.decision, Decision::Defer);
    assert_eq!(r.reason, Some(ReasonCode::Upcoming));

    let available = candidate_from_raw(raw.with_availability(Availability::Available));
    let r = e.score(&available, &channel());
    assert_eq!(r.decision, Decision::Accept);
}

#[test]
fn upcoming_low_scorer_is_not_rejected() {
    let c = candidate_from_raw(
        RawItem::new("vid", "UC1", "Chat").with_availability(Availability::Upcoming),
    );
    assert_eq!(engine().score(&c, &channel()).decision, Decision::Defer);
}

#[test]
fn threshold_is_inclusive() {
    // base 50 + race 15 = 65 == accept_threshold
    let r = engine().score(&candidate("Race day"), &channel());
    assert_eq!(r.score, 65);
    assert_eq!(r.decision, Decision::Accept);

    let r = engine().score(&candidate("Paddock walk"), &channel());
    assert_eq!(r.score, 50);
    assert_eq!(r.decision, Decision::Reject);
    assert_eq!(r.reason, Some(ReasonCode::BelowThreshold));
}

#[test]
fn stale_unwatched_item_drops_below_threshold() {
    let e = engine();
    let now = chrono::Utc::now();
    let raw = RawItem::new("vid", "UC1", "Race day").with_published_at(now - chrono::Duration::hours(36));

    // 50 + race 15, fresh view data is not known yet
    assert_eq!(e.score_at(&candidate_from_raw(raw.clone()), &channel(), now).score, 65);

    let quiet = e.score_at(&candidate_from_raw(raw.clone().with_views(40)), &channel(), now);
    assert_eq!(quiet.score, 55);
    assert_eq!(quiet.reason, Some(ReasonCode::BelowThreshold));

    let popular = e.score_at(&candidate_from_raw(raw.with_views(8_000)), &channel(), now);
    assert_eq!(popular.score, 70);
    assert!(popular.is_accepted());
}
