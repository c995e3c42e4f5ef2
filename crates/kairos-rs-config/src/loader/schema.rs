//! Schema validation helpers for Kairos JSON5 configuration.

use crate::ConfigError;
use serde_json::{Map, Value};

/// Expected JSON shape of a leaf field.
#[derive(Debug, Clone, Copy)]
enum FieldKind {
    String,
    OptionalString,
    Bool,
    U64,
    Number,
    OneOf(&'static [&'static str]),
    ActiveHours,
}

/// Allowed keys and field kinds per top-level section.
const SECTIONS: &[(&str, &[(&str, FieldKind)])] = &[
    (
        "storage",
        &[
            ("data_dir", FieldKind::String),
            ("database", FieldKind::OptionalString),
        ],
    ),
    (
        "history",
        &[
            ("max_messages", FieldKind::U64),
            ("compaction_threshold", FieldKind::Number),
            ("compaction_cooldown_secs", FieldKind::U64),
            ("compaction_on_failure", FieldKind::OneOf(&["skip", "retry"])),
            ("compaction_retry_attempts", FieldKind::U64),
            ("prompt_window", FieldKind::U64),
        ],
    ),
    ("debounce", &[("window_ms", FieldKind::U64)]),
    (
        "heartbeat",
        &[
            ("enabled", FieldKind::Bool),
            ("interval_secs", FieldKind::U64),
            ("job_poll_secs", FieldKind::U64),
            ("active_hours", FieldKind::ActiveHours),
            ("checklist_path", FieldKind::String),
            ("home_history_limit", FieldKind::U64),
            ("memory_limit", FieldKind::U64),
        ],
    ),
    (
        "messenger",
        &[
            ("base_url", FieldKind::String),
            ("api_key", FieldKind::String),
            ("home_conversation_id", FieldKind::String),
            ("bot_name", FieldKind::String),
            ("max_message_chars", FieldKind::U64),
            ("require_mention_outside_home", FieldKind::Bool),
            ("timeout_secs", FieldKind::U64),
        ],
    ),
    (
        "model",
        &[
            ("base_url", FieldKind::String),
            ("model", FieldKind::String),
            ("api_key", FieldKind::OptionalString),
            ("timeout_secs", FieldKind::U64),
        ],
    ),
    (
        "retry",
        &[
            ("max_attempts", FieldKind::U64),
            ("base_delay_ms", FieldKind::U64),
        ],
    ),
    (
        "webhook",
        &[
            ("bind", FieldKind::String),
            ("secret", FieldKind::OptionalString),
        ],
    ),
    (
        "persona",
        &[
            ("path", FieldKind::String),
            ("fallback", FieldKind::String),
        ],
    ),
    ("skills", &[("path", FieldKind::String)]),
    (
        "daily_log",
        &[
            ("path", FieldKind::OptionalString),
            ("recent_days", FieldKind::U64),
        ],
    ),
    ("notifications", &[("enabled", FieldKind::Bool)]),
    (
        "status",
        &[
            ("enabled", FieldKind::Bool),
            ("path", FieldKind::OptionalString),
        ],
    ),
];

/// Validate a single config layer (or the merged result) against the schema.
pub(super) fn validate_layer_schema(value: &Value, layer: &str) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, "")?;
    for (key, value) in map {
        if key == "$schema" {
            expect_string(value, layer, key)?;
            continue;
        }
        let Some((_, fields)) = SECTIONS.iter().find(|(name, _)| name == key) else {
            return Err(invalid_field(layer, key, "unknown key"));
        };
        validate_section(value, fields, layer, key)?;
    }
    Ok(())
}

fn validate_section(
    value: &Value,
    fields: &[(&str, FieldKind)],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    let map = expect_object(value, layer, path)?;
    for (key, value) in map {
        let field_path = join_path(path, key);
        let Some((_, kind)) = fields.iter().find(|(name, _)| name == key) else {
            return Err(invalid_field(layer, &field_path, "unknown key"));
        };
        validate_field(value, *kind, layer, &field_path)?;
    }
    Ok(())
}

fn validate_field(value: &Value, kind: FieldKind, layer: &str, path: &str) -> Result<(), ConfigError> {
    match kind {
        FieldKind::String => expect_string(value, layer, path),
        FieldKind::OptionalString => {
            if value.is_null() {
                Ok(())
            } else {
                expect_string(value, layer, path)
            }
        }
        FieldKind::Bool => expect_bool(value, layer, path),
        FieldKind::U64 => expect_u64(value, layer, path),
        FieldKind::Number => expect_f64(value, layer, path),
        FieldKind::OneOf(choices) => match value.as_str() {
            Some(choice) if choices.contains(&choice) => Ok(()),
            _ => Err(invalid_field(
                layer,
                path,
                &format!("expected one of {}", choices.join(", ")),
            )),
        },
        FieldKind::ActiveHours => {
            if value.is_null() {
                return Ok(());
            }
            let map = expect_object(value, layer, path)?;
            ensure_allowed_keys(map, &["start", "end"], layer, path)?;
            for bound in ["start", "end"] {
                let bound_path = join_path(path, bound);
                let Some(value) = map.get(bound) else {
                    return Err(invalid_field(layer, &bound_path, "missing required field"));
                };
                expect_string(value, layer, &bound_path)?;
            }
            Ok(())
        }
    }
}

/// Expect a JSON object or return a typed error.
fn expect_object<'a>(
    value: &'a Value,
    layer: &str,
    path: &str,
) -> Result<&'a Map<String, Value>, ConfigError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(invalid_field(layer, path, "expected object")),
    }
}

fn expect_string(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.as_str().is_some() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected string"))
    }
}

fn expect_bool(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if matches!(value, Value::Bool(_)) {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected bool"))
    }
}

fn expect_u64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_u64() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected non-negative integer"))
    }
}

fn expect_f64(value: &Value, layer: &str, path: &str) -> Result<(), ConfigError> {
    if value.is_number() {
        Ok(())
    } else {
        Err(invalid_field(layer, path, "expected number"))
    }
}

/// Ensure an object contains only allowed keys.
fn ensure_allowed_keys(
    map: &Map<String, Value>,
    allowed: &[&str],
    layer: &str,
    path: &str,
) -> Result<(), ConfigError> {
    for key in map.keys() {
        if !allowed.contains(&key.as_str()) {
            return Err(invalid_field(layer, &join_path(path, key), "unknown key"));
        }
    }
    Ok(())
}

/// Join nested paths for better error messages.
fn join_path(prefix: &str, key: &str) -> String {
    if prefix.is_empty() {
        key.to_string()
    } else {
        format!("{prefix}.{key}")
    }
}

/// Build a structured invalid-field error.
fn invalid_field(layer: &str, path: &str, message: &str) -> ConfigError {
    let normalized_path = if path.is_empty() { "root" } else { path };
    ConfigError::InvalidField {
        path: format!("{layer}:{normalized_path}"),
        message: message.to_string(),
    }
}
