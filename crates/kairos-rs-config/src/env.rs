//! `KAIROS_*` environment overrides applied on top of the merged layers.

use crate::{ConfigError, KairosConfig};
use log::debug;

impl KairosConfig {
    /// Apply environment overrides using `lookup` to read variables.
    /// Blank values are ignored.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name).filter(|value| !value.trim().is_empty()).map(|value| {
                debug!("applying env override (var={name})");
                value.trim().to_string()
            })
        };

        if let Some(value) = read("KAIROS_MESSENGER_URL") {
            self.messenger.base_url = value;
        }
        if let Some(value) = read("KAIROS_MESSENGER_API_KEY") {
            self.messenger.api_key = value;
        }
        if let Some(value) = read("KAIROS_HOME_CONVERSATION") {
            self.messenger.home_conversation_id = value;
        }
        if let Some(value) = read("KAIROS_MODEL_URL") {
            self.model.base_url = value;
        }
        if let Some(value) = read("KAIROS_WEBHOOK_SECRET") {
            self.webhook.secret = Some(value);
        }
        if let Some(value) = read("KAIROS_BIND") {
            self.webhook.bind = value;
        }
        if let Some(value) = read("KAIROS_HEARTBEAT_ENABLED") {
            self.heartbeat.enabled = parse_bool("KAIROS_HEARTBEAT_ENABLED", &value)?;
        }
        if let Some(value) = read("KAIROS_HEARTBEAT_INTERVAL") {
            self.heartbeat.interval_secs =
                value
                    .parse()
                    .map_err(|err: std::num::ParseIntError| ConfigError::InvalidEnv {
                        var: "KAIROS_HEARTBEAT_INTERVAL".to_string(),
                        message: err.to_string(),
                    })?;
        }
        Ok(())
    }
}

fn parse_bool(var: &str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var: var.to_string(),
            message: format!("expected a boolean, got {value:?}"),
        }),
    }
}
