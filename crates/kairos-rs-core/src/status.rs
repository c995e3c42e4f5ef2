//! Human-readable Markdown snapshot of durable state.

use crate::error::KairosCoreError;
use crate::skills::SkillLibrary;
use chrono::Utc;
use kairos_rs_store::{HistoryRing, JobSchedule, JobStore, MemoryStore};
use log::{debug, warn};
use std::fs;
use std::path::{Path, PathBuf};

/// Rewrites the status file after state changes.
#[derive(Clone)]
pub struct StatusWriter {
    path: PathBuf,
    enabled: bool,
    memory: MemoryStore,
    jobs: JobStore,
    history: HistoryRing,
    skills: SkillLibrary,
}

impl StatusWriter {
    pub fn new(
        path: impl Into<PathBuf>,
        enabled: bool,
        memory: MemoryStore,
        jobs: JobStore,
        history: HistoryRing,
        skills: SkillLibrary,
    ) -> Self {
        Self {
            path: path.into(),
            enabled,
            memory,
            jobs,
            history,
            skills,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Rewrite the file, logging instead of failing.
    pub fn refresh(&self) {
        if !self.enabled {
            return;
        }
        match self.write() {
            Ok(()) => debug!("refreshed status file (path={})", self.path.display()),
            Err(err) => warn!(
                "failed to refresh status file (path={}, err={})",
                self.path.display(),
                err
            ),
        }
    }

    fn write(&self) -> Result<(), KairosCoreError> {
        let rendered = self.render()?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, rendered)?;
        Ok(())
    }

    /// Render the snapshot without writing it.
    pub fn render(&self) -> Result<String, KairosCoreError> {
        let mut lines = vec![
            "# Kairos Status".to_string(),
            String::new(),
            format!(
                "_Generated at {}. Changes to this file are overwritten._",
                Utc::now().format("%Y-%m-%d %H:%M UTC")
            ),
            String::new(),
            "## Memories".to_string(),
            String::new(),
        ];

        let memories = self.memory.list_all()?;
        if memories.is_empty() {
            lines.push("_No memories stored._".to_string());
        }
        for record in memories {
            let tags = if record.tags.is_empty() {
                String::new()
            } else {
                format!(" `[{}]`", record.tags.join(", "))
            };
            lines.push(format!(
                "- **{}**: {}{} _(updated {})_",
                record.key,
                record.value,
                tags,
                record.updated_at.format("%Y-%m-%d")
            ));
        }

        lines.extend([String::new(), "## Scheduled Jobs".to_string(), String::new()]);
        let jobs = self.jobs.list()?;
        if jobs.is_empty() {
            lines.push("_No scheduled jobs._".to_string());
        } else {
            lines.push("| ID | Name | Type | Schedule | Conversation | Prompt | Enabled | Last Run |".to_string());
            lines.push("|---|---|---|---|---|---|---|---|".to_string());
        }
        for job in jobs {
            let (kind, schedule) = match &job.schedule {
                JobSchedule::Recurring(cron) => ("recurring", cron.to_string()),
                JobSchedule::OneShot(at) => ("one-time", at.format("%Y-%m-%d %H:%M UTC").to_string()),
            };
            let last_run = job
                .last_run_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "never".to_string());
            lines.push(format!(
                "| {} | {} | {} | `{}` | {} | {} | {} | {} |",
                job.id,
                job.name,
                kind,
                schedule,
                job.target_conversation_id,
                job.prompt.replace('|', "\\|").replace('\n', " "),
                if job.enabled { "yes" } else { "no" },
                last_run
            ));
        }

        lines.extend([String::new(), "## Conversation History".to_string(), String::new()]);
        let conversations = self.history.conversations()?;
        if conversations.is_empty() {
            lines.push("_No conversation history._".to_string());
        }
        for conversation_id in conversations {
            let count = self.history.count(&conversation_id)?;
            let latest = self
                .history
                .recent(&conversation_id, 1)?
                .first()
                .map(|entry| entry.created_at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "?".to_string());
            lines.push(format!(
                "- Conversation {conversation_id}: {count} messages (latest: {latest})"
            ));
        }

        lines.extend([String::new(), "## Skills".to_string(), String::new()]);
        let skills = self.skills.list();
        if skills.is_empty() {
            lines.push("_No skills installed._".to_string());
        }
        for skill in skills {
            lines.push(format!("- {}", skill.name));
        }

        Ok(lines.join("\n") + "\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kairos_rs_protocol::Role;
    use kairos_rs_store::{Database, HistoryLimits, JobRequest};
    use tempfile::tempdir;

    #[test]
    fn refresh_writes_every_section() {
        let temp = tempdir().expect("tempdir");
        let db = Database::open_in_memory().expect("db");
        let memory = db.memory();
        let jobs = db.jobs();
        let history = db.history(HistoryLimits::default());
        memory
            .save("user_name", "Alice", &["profile".to_string()])
            .expect("save");
        jobs.create(JobRequest {
            name: "tea".to_string(),
            target_conversation_id: "1".to_string(),
            prompt: "remind | tea".to_string(),
            cron: Some("16:00".to_string()),
            once_at: None,
        })
        .expect("job");
        history.append("1", Role::User, "hi").expect("append");

        let writer = StatusWriter::new(
            temp.path().join("data/status.md"),
            true,
            memory,
            jobs,
            history,
            SkillLibrary::new(temp.path().join("skills")),
        );
        writer.refresh();

        let text = fs::read_to_string(writer.path()).expect("status file");
        assert!(text.starts_with("# Kairos Status\n"));
        assert!(text.contains("- **user_name**: Alice `[profile]`"));
        assert!(text.contains("| tea | recurring | `16:00` | 1 | remind \\| tea | yes | never |"));
        assert!(text.contains("- Conversation 1: 1 messages"));
        assert!(text.contains("_No skills installed._"));
    }

    #[test]
    fn disabled_writer_does_nothing() {
        let temp = tempdir().expect("tempdir");
        let db = Database::open_in_memory().expect("db");
        let writer = StatusWriter::new(
            temp.path().join("status.md"),
            false,
            db.memory(),
            db.jobs(),
            db.history(HistoryLimits::default()),
            SkillLibrary::new(temp.path()),
        );
        writer.refresh();
        assert!(!writer.path().exists());
    }
}
