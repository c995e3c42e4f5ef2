//! Tests for layered configuration loading.

use super::*;
use crate::CompactionFailurePolicy;
use pretty_assertions::assert_eq;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Write JSON5 contents to a path, creating parent directories if needed.
fn write_json5(path: &Path, contents: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("dir");
    }
    fs::write(path, contents).expect("write");
}

#[test]
fn parse_minimal_config() {
    let config = KairosConfig::load_from_str("{}").expect("config");
    assert_eq!(config.history.max_messages, 50);
    assert_eq!(config.history.compaction_threshold, 0.8);
    assert_eq!(config.history.compaction_cooldown_secs, 14_400);
    assert_eq!(config.debounce.window_ms, 1500);
    assert_eq!(config.heartbeat.interval_secs, 3600);
    assert_eq!(config.retry.max_attempts, 3);
    assert_eq!(config.messenger.max_message_chars, 2000);
    assert_eq!(
        config.history.compaction_on_failure,
        CompactionFailurePolicy::Skip
    );
    assert_eq!(config.database_path(), Path::new("data").join("kairos.db"));
}

#[test]
fn rejects_unknown_top_level_key() {
    let err = KairosConfig::load_from_str(r#"{ unexpected: true }"#).unwrap_err();
    assert!(format!("{err}").contains("unknown key"));
}

#[test]
fn rejects_unknown_nested_key_with_path() {
    let err = KairosConfig::load_from_str(r#"{ history: { max: 3 } }"#).unwrap_err();
    assert!(format!("{err}").contains("history.max"));
}

#[test]
fn rejects_invalid_failure_policy() {
    let err =
        KairosConfig::load_from_str(r#"{ history: { compaction_on_failure: "panic" } }"#)
            .unwrap_err();
    assert!(format!("{err}").contains("history.compaction_on_failure"));
}

#[test]
fn rejects_out_of_range_threshold() {
    let err = KairosConfig::load_from_str(r#"{ history: { compaction_threshold: 1.5 } }"#)
        .unwrap_err();
    assert!(format!("{err}").contains("compaction_threshold"));
}

#[test]
fn rejects_malformed_active_hours() {
    let err = KairosConfig::load_from_str(
        r#"{ heartbeat: { active_hours: { start: "8am", end: "22:00" } } }"#,
    )
    .unwrap_err();
    assert!(format!("{err}").contains("heartbeat.active_hours"));

    let err =
        KairosConfig::load_from_str(r#"{ heartbeat: { active_hours: { start: "08:00" } } }"#)
            .unwrap_err();
    assert!(format!("{err}").contains("active_hours.end"));
}

#[test]
fn layered_config_prefers_runtime_over_cwd_over_user() {
    let temp = TempDir::new().expect("tmp");
    let root = temp.path();
    let cwd = root.join("work");
    fs::create_dir_all(&cwd).expect("cwd");

    let user_config = root.join("user.json5");
    write_json5(
        &user_config,
        "{ history: { max_messages: 30, prompt_window: 5 }, messenger: { bot_name: \"user\" } }",
    );
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        "{ history: { max_messages: 40 }, messenger: { bot_name: \"cwd\" } }",
    );
    let runtime = root.join("runtime.json5");
    write_json5(&runtime, "{ messenger: { bot_name: \"runtime\" } }");

    let mut options = LayeredConfigOptions::new(&cwd)
        .with_runtime_path(&runtime)
        .without_env();
    options.user_config_path = Some(user_config);
    let layered = KairosConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.layers.len(), 3);
    assert_eq!(layered.layers[0].source, ConfigLayerSource::User);
    assert_eq!(layered.config.history.max_messages, 40);
    assert_eq!(layered.config.history.prompt_window, 5);
    assert_eq!(layered.config.messenger.bot_name, "runtime");
}

#[test]
fn layered_config_resolves_relative_paths_against_cwd() {
    let temp = TempDir::new().expect("tmp");
    let cwd = temp.path().canonicalize().expect("canonical");
    write_json5(
        &cwd.join(DEFAULT_CONFIG_FILE),
        "{ storage: { data_dir: \"state\" } }",
    );

    let mut options = LayeredConfigOptions::new(&cwd).without_env();
    options.user_config_path = None;
    let layered = KairosConfig::load_layered_with_options(options).expect("layered");

    assert_eq!(layered.config.storage.data_dir, cwd.join("state"));
    assert_eq!(layered.config.status_path(), cwd.join("state").join("status.md"));
    assert_eq!(layered.config.skills.path, cwd.join("skills"));
}

#[test]
fn missing_runtime_layer_is_an_error() {
    let temp = TempDir::new().expect("tmp");
    let mut options = LayeredConfigOptions::new(temp.path())
        .with_runtime_path(temp.path().join("nope.json5"))
        .without_env();
    options.user_config_path = None;
    let err = KairosConfig::load_layered_with_options(options).unwrap_err();
    assert!(matches!(err, ConfigError::ReadFailed(_)));
}

#[test]
fn invalid_layer_reports_its_label() {
    let temp = TempDir::new().expect("tmp");
    write_json5(
        &temp.path().join(DEFAULT_CONFIG_FILE),
        "{ debounce: { window_ms: \"fast\" } }",
    );
    let mut options = LayeredConfigOptions::new(temp.path()).without_env();
    options.user_config_path = None;
    let err = KairosConfig::load_layered_with_options(options).unwrap_err();
    let msg = format!("{err}");
    assert!(msg.contains("cwd("));
    assert!(msg.contains("debounce.window_ms"));
}
