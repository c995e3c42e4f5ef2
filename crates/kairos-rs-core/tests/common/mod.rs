//! Shared harness for core integration tests.

#![allow(dead_code)]

use kairos_rs_core::{
    ContextBuilder, ContextSettings, DailyLog, DirectiveExecutor, Services, SkillLibrary,
    StaticStatus, StatusWriter,
};
use kairos_rs_protocol::{Messenger, ModelClient};
use kairos_rs_store::{Database, HistoryLimits};
use kairos_rs_test_utils::{RecordingMessenger, RecordingNotifier};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

pub const HOME: &str = "1";

pub struct Harness {
    pub temp: TempDir,
    pub db: Database,
    pub messenger: RecordingMessenger,
    pub notifier: RecordingNotifier,
    pub services: Services,
}

impl Harness {
    pub fn status_path(&self) -> PathBuf {
        self.temp.path().join("data/status.md")
    }
}

pub fn harness(model: Arc<dyn ModelClient>, limits: HistoryLimits) -> Harness {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = Database::open(temp.path().join("data/kairos.db")).expect("open db");
    let messenger = RecordingMessenger::new();
    let notifier = RecordingNotifier::default();
    let history = db.history(limits);
    let skills = SkillLibrary::new(temp.path().join("skills"));
    let daily_log = DailyLog::new(temp.path().join("data/memory"));
    let status = StatusWriter::new(
        temp.path().join("data/status.md"),
        true,
        db.memory(),
        db.jobs(),
        history.clone(),
        skills.clone(),
    );
    let executor = DirectiveExecutor::new(
        db.memory(),
        db.jobs(),
        skills.clone(),
        daily_log.clone(),
        Arc::new(notifier.clone()),
    )
    .with_status(status);
    let context = ContextBuilder::new(
        db.memory(),
        db.jobs(),
        history.clone(),
        skills,
        daily_log,
        Arc::new(StaticStatus("## System Status\n\n- CPU: 3.0%".to_string())),
        ContextSettings {
            persona_path: temp.path().join("SOUL.md"),
            persona_fallback: "You are Kairos.".to_string(),
            checklist_path: temp.path().join("HEARTBEAT.md"),
            memory_limit: 100,
            recent_log_days: 3,
            home_history_limit: 10,
        },
    );
    let messenger_handle: Arc<dyn Messenger> = Arc::new(messenger.clone());
    let services = Services {
        memory: db.memory(),
        history,
        jobs: db.jobs(),
        model,
        messenger: messenger_handle,
        executor,
        context,
        home_conversation_id: HOME.to_string(),
        max_message_chars: 2000,
        prompt_window: 20,
    };
    Harness {
        temp,
        db,
        messenger,
        notifier,
        services,
    }
}
