//! Prompt assembly for conversations, heartbeat decisions, compaction, and
//! background tasks.

use crate::daily_log::DailyLog;
use crate::error::KairosCoreError;
use crate::skills::SkillLibrary;
use crate::system_status::SystemStatusProvider;
use chrono::{DateTime, Local, Utc};
use kairos_rs_protocol::ChatMessage;
use kairos_rs_store::{HistoryEntry, HistoryRing, JobStore, MemoryRecord, MemoryStore};
use log::debug;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

/// Directive reference appended to every conversation prompt.
pub const DIRECTIVE_GUIDE: &str = "\
## Directives

You can change your own state by writing directives anywhere in a reply. They
are removed before the user sees the reply.

- `[MEMORY_SAVE: key=<snake_case_key>, value=<text>, tags=<tag, tag>]` remembers a fact. Saving an existing key replaces it.
- `[MEMORY_DELETE: key=<key>]` forgets a fact.
- `[SCHEDULE: name=<unique name>, prompt=<what to do>, cron=<HH:MM or 5-field cron>]` runs a prompt on a schedule.
- `[SCHEDULE: name=<unique name>, prompt=<what to do>, at=<YYYY-MM-DD HH:MM>]` runs a prompt once.
- `[SKILL_CREATE: name=<name>, description=<one line>] instructions [/SKILL_CREATE]` saves reusable instructions.
- `[DAILY_LOG: <note>]` adds a line to today's log.
- `[NOTIFY: title=<title>, message=<text>]` sends a desktop notification.";

const HEARTBEAT_INSTRUCTIONS: &str = "\
You are running an autonomous background check. Decide whether there is
anything genuinely useful to do for the user right now: a reminder, a timely
check-in, or a background task. Most of the time nothing is needed.

Respond with a single JSON object and nothing else:
  {\"action\": \"none\"}
  {\"action\": \"message\", \"content\": \"<message to send>\"}
  {\"action\": \"task\", \"content\": \"<task to run>\"}
  {\"action\": \"schedule\", \"name\": \"<name>\", \"prompt\": \"<prompt>\", \"cron\": \"<HH:MM or cron>\"}
  {\"action\": \"schedule\", \"name\": \"<name>\", \"prompt\": \"<prompt>\", \"at\": \"<YYYY-MM-DD HH:MM>\"}

Only act when there is clear value. Prefer \"none\".";

const COMPACTION_INSTRUCTIONS: &str = "\
The conversation below is about to be trimmed. Extract every durable fact
worth keeping about the user (preferences, plans, people, ongoing projects)
and emit one `[MEMORY_SAVE: key=<snake_case_key>, value=<text>, tags=<tags>]`
directive per fact. Reuse existing keys when updating a fact. Output only
directives; write nothing else.";

const TASK_INSTRUCTIONS: &str = "\
You are executing a background task for the user. Complete it and reply with a
concise summary of the result.";

/// Assembles model inputs from durable state.
#[derive(Clone)]
pub struct ContextBuilder {
    memory: MemoryStore,
    jobs: JobStore,
    history: HistoryRing,
    skills: SkillLibrary,
    daily_log: DailyLog,
    system_status: Arc<dyn SystemStatusProvider>,
    settings: ContextSettings,
}

/// Paths and limits used while assembling prompts.
#[derive(Debug, Clone)]
pub struct ContextSettings {
    pub persona_path: PathBuf,
    pub persona_fallback: String,
    pub checklist_path: PathBuf,
    pub memory_limit: usize,
    pub recent_log_days: u32,
    pub home_history_limit: usize,
}

impl ContextBuilder {
    pub fn new(
        memory: MemoryStore,
        jobs: JobStore,
        history: HistoryRing,
        skills: SkillLibrary,
        daily_log: DailyLog,
        system_status: Arc<dyn SystemStatusProvider>,
        settings: ContextSettings,
    ) -> Self {
        Self {
            memory,
            jobs,
            history,
            skills,
            daily_log,
            system_status,
            settings,
        }
    }

    /// System prompt for a conversation turn.
    pub fn system_prompt(&self, now: DateTime<Local>) -> Result<String, KairosCoreError> {
        let mut sections = vec![self.persona(), DIRECTIVE_GUIDE.to_string()];
        sections.push(self.memory_section(Some(self.settings.memory_limit))?);
        sections.push(
            self.daily_log
                .render_recent(self.settings.recent_log_days, now.date_naive()),
        );
        sections.push(self.jobs_section()?);
        sections.push(self.skills.render_section());
        sections.push(self.live_section(now));
        sections.push(self.system_status.snapshot());
        Ok(join_sections(sections))
    }

    /// System prompt plus `history` plus the new user input.
    pub fn conversation_messages(
        &self,
        history: &[HistoryEntry],
        user_content: &str,
        now: DateTime<Local>,
    ) -> Result<Vec<ChatMessage>, KairosCoreError> {
        let mut messages = vec![ChatMessage::system(self.system_prompt(now)?)];
        messages.extend(history.iter().map(HistoryEntry::to_chat_message));
        messages.push(ChatMessage::user(user_content));
        Ok(messages)
    }

    /// Decision request for one heartbeat tick.
    pub fn heartbeat_messages(
        &self,
        home_conversation_id: &str,
        now: DateTime<Local>,
    ) -> Result<Vec<ChatMessage>, KairosCoreError> {
        let mut sections = vec![
            format!("{}\n\n{}", self.persona(), HEARTBEAT_INSTRUCTIONS),
            self.live_section(now),
            self.memory_section(None)?,
            self.jobs_section()?,
            self.checklist(),
            self.system_status.snapshot(),
        ];
        sections.retain(|section| !section.trim().is_empty());
        let mut messages = vec![ChatMessage::system(sections.join("\n\n"))];
        messages.extend(
            self.history
                .recent(home_conversation_id, self.settings.home_history_limit)?
                .iter()
                .map(HistoryEntry::to_chat_message),
        );
        messages.push(ChatMessage::user("What should you do right now?"));
        debug!(
            "assembled heartbeat context (messages={}, conversation={})",
            messages.len(),
            home_conversation_id
        );
        Ok(messages)
    }

    /// Request that turns `history` into MEMORY_SAVE directives.
    pub fn compaction_messages(
        &self,
        history: &[HistoryEntry],
    ) -> Result<Vec<ChatMessage>, KairosCoreError> {
        let mut system = COMPACTION_INSTRUCTIONS.to_string();
        let memory = self.memory_section(Some(self.settings.memory_limit))?;
        if !memory.is_empty() {
            system.push_str("\n\n");
            system.push_str(&memory);
        }
        let transcript = history
            .iter()
            .map(|entry| format!("{}: {}", entry.role, entry.content))
            .collect::<Vec<_>>()
            .join("\n");
        Ok(vec![
            ChatMessage::system(system),
            ChatMessage::user(transcript),
        ])
    }

    /// Request for a background task started by the heartbeat.
    pub fn task_messages(&self, task: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage::system(format!("{}\n\n{TASK_INSTRUCTIONS}\n\nTask: {task}", self.persona())),
            ChatMessage::user(task),
        ]
    }

    fn persona(&self) -> String {
        match fs::read_to_string(&self.settings.persona_path) {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => self.settings.persona_fallback.clone(),
        }
    }

    fn checklist(&self) -> String {
        fs::read_to_string(&self.settings.checklist_path)
            .map(|text| text.trim().to_string())
            .unwrap_or_default()
    }

    /// Most recently updated records first; `None` lists every record.
    fn memory_section(&self, limit: Option<usize>) -> Result<String, KairosCoreError> {
        let records = match limit {
            Some(limit) => self.memory.list_recent(limit, None)?,
            None => self.memory.list_all()?,
        };
        if records.is_empty() {
            return Ok(String::new());
        }
        let lines: Vec<String> = records.iter().map(memory_line).collect();
        Ok(format!("## Memory\n\n{}", lines.join("\n")))
    }

    fn jobs_section(&self) -> Result<String, KairosCoreError> {
        let jobs = self.jobs.list()?;
        if jobs.is_empty() {
            return Ok(String::new());
        }
        let lines: Vec<String> = jobs
            .iter()
            .map(|job| {
                let last_run = job
                    .last_run_at
                    .map(|at| {
                        format!(
                            ", last ran {}",
                            at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
                        )
                    })
                    .unwrap_or_default();
                let disabled = if job.enabled { "" } else { " (done)" };
                format!(
                    "- **{}**: {} -> {}{}{}",
                    job.name, job.schedule, job.prompt, last_run, disabled
                )
            })
            .collect();
        Ok(format!("## Scheduled Jobs\n\n{}", lines.join("\n")))
    }

    fn live_section(&self, now: DateTime<Local>) -> String {
        format!(
            "## Current Context\n\nIt is {} (local) / {}.",
            now.format("%A %Y-%m-%d %H:%M"),
            now.with_timezone(&Utc).format("%Y-%m-%d %H:%M UTC")
        )
    }
}

fn memory_line(record: &MemoryRecord) -> String {
    if record.tags.is_empty() {
        format!("- {}: {}", record.key, record.value)
    } else {
        format!("- {}: {} [{}]", record.key, record.value, record.tags.join(", "))
    }
}

fn join_sections(sections: Vec<String>) -> String {
    sections
        .into_iter()
        .filter(|section| !section.trim().is_empty())
        .map(|section| section.trim_end().to_string())
        .collect::<Vec<_>>()
        .join("\n\n")
}
