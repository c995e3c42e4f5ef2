//! Configuration schema for Kairos.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root config for a Kairos assistant process.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct KairosConfig {
    #[serde(default, rename = "$schema")]
    pub schema: Option<String>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub debounce: DebounceConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub messenger: MessengerConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub skills: SkillsConfig,
    #[serde(default)]
    pub daily_log: DailyLogConfig,
    #[serde(default)]
    pub notifications: NotificationsConfig,
    #[serde(default)]
    pub status: StatusConfig,
}

impl KairosConfig {
    /// Start building a config programmatically with defaults applied.
    pub fn builder() -> KairosConfigBuilder {
        KairosConfigBuilder::new()
    }

    /// Path of the SQLite database file.
    pub fn database_path(&self) -> PathBuf {
        self.storage
            .database
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("kairos.db"))
    }

    /// Directory holding the per-day markdown logs.
    pub fn daily_log_dir(&self) -> PathBuf {
        self.daily_log
            .path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("memory"))
    }

    /// Path of the human-readable status snapshot.
    pub fn status_path(&self) -> PathBuf {
        self.status
            .path
            .clone()
            .unwrap_or_else(|| self.storage.data_dir.join("status.md"))
    }

    /// Resolve every relative path against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        fn rebase(base: &Path, path: &mut PathBuf) {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        rebase(base, &mut self.storage.data_dir);
        if let Some(path) = self.storage.database.as_mut() {
            rebase(base, path);
        }
        if let Some(path) = self.daily_log.path.as_mut() {
            rebase(base, path);
        }
        if let Some(path) = self.status.path.as_mut() {
            rebase(base, path);
        }
        rebase(base, &mut self.heartbeat.checklist_path);
        rebase(base, &mut self.persona.path);
        rebase(base, &mut self.skills.path);
    }
}

/// Builder for assembling a `KairosConfig` in code.
#[derive(Debug, Default, Clone)]
pub struct KairosConfigBuilder {
    config: KairosConfig,
}

impl KairosConfigBuilder {
    /// Create a new builder seeded with default config values.
    pub fn new() -> Self {
        Self {
            config: KairosConfig::default(),
        }
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.config.history = history;
        self
    }

    pub fn debounce(mut self, debounce: DebounceConfig) -> Self {
        self.config.debounce = debounce;
        self
    }

    pub fn heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.config.heartbeat = heartbeat;
        self
    }

    pub fn messenger(mut self, messenger: MessengerConfig) -> Self {
        self.config.messenger = messenger;
        self
    }

    pub fn model(mut self, model: ModelConfig) -> Self {
        self.config.model = model;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn webhook(mut self, webhook: WebhookConfig) -> Self {
        self.config.webhook = webhook;
        self
    }

    /// Finalize and return the built `KairosConfig`.
    pub fn build(self) -> KairosConfig {
        self.config
    }
}

/// Where durable state lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Database file; defaults to `<data_dir>/kairos.db`.
    #[serde(default)]
    pub database: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            database: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

/// What to do when a compaction model call fails.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompactionFailurePolicy {
    /// Log and wait for the next eligible tick.
    #[default]
    Skip,
    /// Retry the compaction call before giving up for this tick.
    Retry,
}

/// History ring and compaction trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Per-conversation cap on stored turns.
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    /// Fraction of the cap at which compaction becomes eligible.
    #[serde(default = "default_compaction_threshold")]
    pub compaction_threshold: f64,
    #[serde(default = "default_compaction_cooldown_secs")]
    pub compaction_cooldown_secs: u64,
    #[serde(default)]
    pub compaction_on_failure: CompactionFailurePolicy,
    /// Extra attempts when the policy is `retry`.
    #[serde(default = "default_compaction_retry_attempts")]
    pub compaction_retry_attempts: u32,
    /// Number of history turns placed in a model request.
    #[serde(default = "default_prompt_window")]
    pub prompt_window: usize,
}

impl HistoryConfig {
    pub fn compaction_cooldown(&self) -> Duration {
        Duration::from_secs(self.compaction_cooldown_secs)
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            max_messages: default_max_messages(),
            compaction_threshold: default_compaction_threshold(),
            compaction_cooldown_secs: default_compaction_cooldown_secs(),
            compaction_on_failure: CompactionFailurePolicy::default(),
            compaction_retry_attempts: default_compaction_retry_attempts(),
            prompt_window: default_prompt_window(),
        }
    }
}

fn default_max_messages() -> usize {
    50
}

fn default_compaction_threshold() -> f64 {
    0.8
}

fn default_compaction_cooldown_secs() -> u64 {
    4 * 60 * 60
}

fn default_compaction_retry_attempts() -> u32 {
    2
}

fn default_prompt_window() -> usize {
    20
}

/// Inbound burst collapsing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

impl DebounceConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            window_ms: default_window_ms(),
        }
    }
}

fn default_window_ms() -> u64 {
    1500
}

/// Time-of-day range during which the heartbeat may act.
///
/// When `start` is later than `end` the window wraps past midnight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActiveHours {
    pub start: String,
    pub end: String,
}

impl ActiveHours {
    /// Parse the `HH:MM` bounds.
    pub fn bounds(&self) -> Result<(NaiveTime, NaiveTime), String> {
        let parse = |value: &str| {
            NaiveTime::parse_from_str(value.trim(), "%H:%M")
                .map_err(|err| format!("expected HH:MM, got {value:?} ({err})"))
        };
        Ok((parse(&self.start)?, parse(&self.end)?))
    }
}

/// Proactive heartbeat loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Period of the minute-level job poll that runs between heartbeats.
    #[serde(default = "default_job_poll_secs")]
    pub job_poll_secs: u64,
    #[serde(default)]
    pub active_hours: Option<ActiveHours>,
    /// Markdown checklist injected into each heartbeat decision.
    #[serde(default = "default_checklist_path")]
    pub checklist_path: PathBuf,
    #[serde(default = "default_home_history_limit")]
    pub home_history_limit: usize,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn job_poll(&self) -> Duration {
        Duration::from_secs(self.job_poll_secs)
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_interval_secs(),
            job_poll_secs: default_job_poll_secs(),
            active_hours: None,
            checklist_path: default_checklist_path(),
            home_history_limit: default_home_history_limit(),
            memory_limit: default_memory_limit(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_job_poll_secs() -> u64 {
    60
}

fn default_checklist_path() -> PathBuf {
    PathBuf::from("HEARTBEAT.md")
}

fn default_home_history_limit() -> usize {
    10
}

fn default_memory_limit() -> usize {
    100
}

/// Chat transport endpoint and behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessengerConfig {
    #[serde(default = "default_messenger_url")]
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_home_conversation_id")]
    pub home_conversation_id: String,
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
    /// Outside the home conversation only `@bot_name` messages are handled.
    #[serde(default = "default_true")]
    pub require_mention_outside_home: bool,
    #[serde(default = "default_messenger_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            base_url: default_messenger_url(),
            api_key: String::new(),
            home_conversation_id: default_home_conversation_id(),
            bot_name: default_bot_name(),
            max_message_chars: default_max_message_chars(),
            require_mention_outside_home: true,
            timeout_secs: default_messenger_timeout_secs(),
        }
    }
}

fn default_messenger_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_home_conversation_id() -> String {
    "1".to_string()
}

fn default_bot_name() -> String {
    "Kairos".to_string()
}

fn default_max_message_chars() -> usize {
    2000
}

fn default_messenger_timeout_secs() -> u64 {
    15
}

/// Model backend endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model_url")]
    pub base_url: String,
    #[serde(default = "default_model_name")]
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_model_url(),
            model: default_model_name(),
            api_key: None,
            timeout_secs: default_model_timeout_secs(),
        }
    }
}

fn default_model_url() -> String {
    "http://localhost:10007".to_string()
}

fn default_model_name() -> String {
    "default".to_string()
}

fn default_model_timeout_secs() -> u64 {
    120
}

/// Backoff for calls to the model and delivery endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

/// Inbound HTTP listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Shared secret expected in `x-webhook-secret` for third-party hooks.
    #[serde(default)]
    pub secret: Option<String>,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            secret: None,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:3939".to_string()
}

/// Base system prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    #[serde(default = "default_persona_path")]
    pub path: PathBuf,
    /// Used when the persona file is missing or empty.
    #[serde(default = "default_persona_fallback")]
    pub fallback: String,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            path: default_persona_path(),
            fallback: default_persona_fallback(),
        }
    }
}

fn default_persona_path() -> PathBuf {
    PathBuf::from("SOUL.md")
}

fn default_persona_fallback() -> String {
    "You are Kairos, a helpful personal assistant.".to_string()
}

/// Skill file directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillsConfig {
    #[serde(default = "default_skills_path")]
    pub path: PathBuf,
}

impl Default for SkillsConfig {
    fn default() -> Self {
        Self {
            path: default_skills_path(),
        }
    }
}

fn default_skills_path() -> PathBuf {
    PathBuf::from("skills")
}

/// Per-day markdown notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyLogConfig {
    /// Defaults to `<data_dir>/memory`.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_recent_days")]
    pub recent_days: u32,
}

impl Default for DailyLogConfig {
    fn default() -> Self {
        Self {
            path: None,
            recent_days: default_recent_days(),
        }
    }
}

fn default_recent_days() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Status snapshot file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Defaults to `<data_dir>/status.md`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
        }
    }
}
