// tests/config_load.rs
//
// Config resolution: TOML with partial sections, env overrides, validation
// and the channel/keyword tables. Anything touching the process env or CWD
// runs under #[serial].

use blueflag::config::{channels::load_channels_from, AppConfig, KeywordTable};
use serial_test::serial;
use std::path::{Path, PathBuf};
use std::{env, fs};

const OVERRIDE_VARS: &[&str] = &[
    "BLUEFLAG_CONFIG",
    "LEMMY_INSTANCE",
    "LEMMY_USERNAME",
    "LEMMY_PASSWORD",
    "LEMMY_COMMUNITY",
    "YOUTUBE_API_KEY",
    "YOUTUBE_API_QUOTA",
    "SCAN_INTERVAL",
    "MAX_POSTS_PER_RUN",
    "MAX_POSTS_PER_DAY",
    "BLUEFLAG_DRY_RUN",
];

fn clear_env() {
    for v in OVERRIDE_VARS {
        env::remove_var(v);
    }
}

fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
    let p = dir.join(name);
    fs::write(&p, body).unwrap();
    p
}

fn repo_file(rel: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join(rel)
}

#[test]
fn partial_toml_keeps_defaults_for_missing_fields() {
    let dir = tempfile::tempdir().unwrap();
    let p = write(
        dir.path(),
        "partial.toml",
        r#"
[quota]
ceiling = 500

[scoring]
accept_threshold = 70
"#,
    );
    let cfg = AppConfig::load_from(&p).unwrap();
    assert_eq!(cfg.quota.ceiling, 500);
    assert_eq!(cfg.quota.units_per_poll, 3);
    assert_eq!(cfg.scoring.accept_threshold, 70);
    assert_eq!(cfg.scoring.base_score, 50);
    assert_eq!(cfg.publish.max_attempts, 3);
    assert!(cfg.status.bind.is_none());
    cfg.validate().unwrap();
}

#[test]
fn unknown_value_types_fail_to_parse() {
    let dir = tempfile::tempdir().unwrap();
    let p = write(dir.path(), "bad.toml", "[quota]\nceiling = \"lots\"\n");
    let err = AppConfig::load_from(&p).unwrap_err();
    assert!(format!("{err:#}").contains("parsing config"));
}

#[test]
fn validate_rejects_inconsistent_values() {
    let mut cfg = AppConfig::default();
    cfg.quota.units_per_poll = cfg.quota.ceiling + 1;
    assert!(cfg.validate().is_err());

    let mut cfg = AppConfig::default();
    cfg.quota.window_anchor_hour_utc = 24;
    assert!(cfg.validate().is_err());

    let mut cfg = AppConfig::default();
    cfg.scoring.description_factor = 1.5;
    assert!(cfg.validate().is_err());

    let mut cfg = AppConfig::default();
    cfg.scoring.accept_threshold = 101;
    assert!(cfg.validate().is_err());

    let mut cfg = AppConfig::default();
    cfg.publish.max_attempts = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn shipped_config_files_are_valid() {
    let cfg = AppConfig::load_from(&repo_file("config/blueflag.toml")).unwrap();
    cfg.validate().unwrap();

    let channels = load_channels_from(&repo_file("config/channels.json")).unwrap();
    assert!(!channels.is_empty());
    assert!(channels.iter().all(|c| !c.primary_tag.is_empty()));

    let keywords = KeywordTable::load_from(&repo_file("config/keywords.json")).unwrap();
    assert!(!keywords.auto_reject.keywords.is_empty());
    assert!(!keywords.race_content.keywords.is_empty());
}

#[serial]
#[test]
fn env_overrides_win_over_file_values() {
    clear_env();
    let dir = tempfile::tempdir().unwrap();
    let p = write(
        dir.path(),
        "blueflag.toml",
        "[quota]\nceiling = 200\n[scan]\ninterval_minutes = 30\n",
    );

    env::set_var("YOUTUBE_API_QUOTA", "750");
    env::set_var("SCAN_INTERVAL", "15");
    env::set_var("MAX_POSTS_PER_RUN", "2");
    env::set_var("BLUEFLAG_DRY_RUN", "yes");
    env::set_var("LEMMY_COMMUNITY", "formula1");

    let cfg = AppConfig::load(Some(&p)).unwrap();
    assert_eq!(cfg.quota.ceiling, 750);
    assert_eq!(cfg.scan.interval_minutes, 15);
    assert_eq!(cfg.scan.max_posts_per_run, 2);
    assert!(cfg.publish.dry_run);
    assert_eq!(cfg.lemmy.community, "formula1");

    clear_env();
}

#[serial]
#[test]
fn malformed_numeric_override_is_an_error() {
    clear_env();
    env::set_var("YOUTUBE_API_QUOTA", "ten thousand");
    let mut cfg = AppConfig::default();
    let err = cfg.apply_env_overrides().unwrap_err();
    assert!(err.to_string().contains("YOUTUBE_API_QUOTA"));
    clear_env();
}

#[serial]
#[test]
fn blank_env_values_are_ignored() {
    clear_env();
    env::set_var("LEMMY_INSTANCE", "   ");
    let mut cfg = AppConfig::default();
    cfg.apply_env_overrides().unwrap();
    assert_eq!(cfg.lemmy.instance, "https://lemmy.world");
    clear_env();
}

#[serial]
#[test]
fn config_path_resolution_order() {
    clear_env();
    let old = env::current_dir().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    // Nothing anywhere: built-in defaults.
    let cfg = AppConfig::load(None).unwrap();
    assert_eq!(cfg.quota.ceiling, 10_000);

    // ./config/blueflag.toml fallback.
    fs::create_dir_all(tmp.path().join("config")).unwrap();
    write(&tmp.path().join("config"), "blueflag.toml", "[quota]\nceiling = 300\n");
    assert_eq!(AppConfig::load(None).unwrap().quota.ceiling, 300);

    // $BLUEFLAG_CONFIG beats the fallback.
    let p_env = write(tmp.path(), "env.toml", "[quota]\nceiling = 400\n");
    env::set_var("BLUEFLAG_CONFIG", &p_env);
    assert_eq!(AppConfig::load(None).unwrap().quota.ceiling, 400);

    // Explicit path beats both.
    let p_cli = write(tmp.path(), "cli.toml", "[quota]\nceiling = 500\n");
    assert_eq!(AppConfig::load(Some(&p_cli)).unwrap().quota.ceiling, 500);

    // Dangling pointers are errors, not silent fallbacks.
    env::set_var("BLUEFLAG_CONFIG", tmp.path().join("missing.toml"));
    assert!(AppConfig::load(None).is_err());
    assert!(AppConfig::load(Some(&tmp.path().join("nope.toml"))).is_err());

    env::set_current_dir(old).unwrap();
    clear_env();
}

#[serial]
#[test]
fn secrets_resolve_from_env_marker() {
    clear_env();
    let mut cfg = AppConfig::default();
    assert!(cfg.lemmy_password().is_err());

    env::set_var("LEMMY_PASSWORD", "hunter2");
    assert_eq!(cfg.lemmy_password().unwrap(), "hunter2");

    cfg.youtube.api_key = "literal-key".into();
    assert_eq!(cfg.youtube_api_key().unwrap(), "literal-key");
    clear_env();
}

#[test]
fn keyword_table_is_sanitized_and_defaulted() {
    let dir = tempfile::tempdir().unwrap();
    let p = write(
        dir.path(),
        "keywords.json",
        r#"{
            "auto_reject": {"keywords": [" reaction ", ""]},
            "warning_signs": {"weight": -20, "keywords": ["rumour"]}
        }"#,
    );
    let table = KeywordTable::load_from(&p).unwrap();
    assert_eq!(table.auto_reject.keywords, vec!["reaction"]);
    assert_eq!(table.warning_signs.weight, 20);
    assert_eq!(table.race_content.weight, 15);
    assert!(table.race_content.keywords.is_empty());
}

#[test]
fn listed_category_without_weight_still_scores() {
    let dir = tempfile::tempdir().unwrap();
    let p = write(dir.path(), "keywords.json", r#"{"race_content":{"keywords":["race"]}}"#);
    let table = KeywordTable::load_from(&p).unwrap();
    assert_eq!(table.race_content.weight, 15);
    assert_eq!(table.race_content.keywords, vec!["race"]);
    assert_eq!(table.quality_boosters.weight, 10);
}

#[test]
fn channel_table_paths_come_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let channels = write(
        dir.path(),
        "channels.json",
        r#"[{"id":"UCx","name":"WRC","primary_tag":"WRC",
             "secondary_tags":[{"tag":"ERC","keywords":["european rally"]}]}]"#,
    );
    let cfg = AppConfig {
        channels_path: channels,
        ..AppConfig::default()
    };
    let loaded = cfg.load_channels().unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].secondary_tags[0].tag, "ERC");

    let missing = AppConfig {
        keywords_path: dir.path().join("absent.json"),
        ..AppConfig::default()
    };
    assert!(missing.load_keywords().is_err());
}
