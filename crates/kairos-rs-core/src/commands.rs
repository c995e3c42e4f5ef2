//! Applies parsed directives to the stores and side channels.

use crate::daily_log::DailyLog;
use crate::directives::{Directive, ScheduleSpec};
use crate::error::KairosCoreError;
use crate::skills::SkillLibrary;
use crate::status::StatusWriter;
use kairos_rs_protocol::Notifier;
use kairos_rs_store::{JobRequest, JobStore, MemoryStore};
use log::{info, warn};
use std::sync::Arc;

/// Outcome of one directive.
#[derive(Debug)]
pub struct DirectiveOutcome {
    pub directive: Directive,
    pub result: Result<(), KairosCoreError>,
}

/// Per-directive results, in application order.
#[derive(Debug, Default)]
pub struct ApplyReport {
    pub outcomes: Vec<DirectiveOutcome>,
}

impl ApplyReport {
    pub fn applied_count(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|outcome| outcome.result.is_ok())
            .count()
    }

    pub fn failures(&self) -> impl Iterator<Item = &DirectiveOutcome> {
        self.outcomes.iter().filter(|outcome| outcome.result.is_err())
    }

    /// Whether any successful directive changed memory, jobs, or skills.
    pub fn mutated(&self) -> bool {
        self.outcomes.iter().any(|outcome| {
            outcome.result.is_ok()
                && matches!(
                    outcome.directive,
                    Directive::MemorySave { .. }
                        | Directive::MemoryDelete { .. }
                        | Directive::ScheduleCreate { .. }
                        | Directive::SkillCreate { .. }
                )
        })
    }
}

/// Executes directives against the Memory Store, Job Store, skills directory,
/// daily log, and notifier.
#[derive(Clone)]
pub struct DirectiveExecutor {
    memory: MemoryStore,
    jobs: JobStore,
    skills: SkillLibrary,
    daily_log: DailyLog,
    notifier: Arc<dyn Notifier>,
    notifications_enabled: bool,
    status: Option<StatusWriter>,
}

impl DirectiveExecutor {
    pub fn new(
        memory: MemoryStore,
        jobs: JobStore,
        skills: SkillLibrary,
        daily_log: DailyLog,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            memory,
            jobs,
            skills,
            daily_log,
            notifier,
            notifications_enabled: true,
            status: None,
        }
    }

    pub fn with_notifications(mut self, enabled: bool) -> Self {
        self.notifications_enabled = enabled;
        self
    }

    pub fn with_status(mut self, status: StatusWriter) -> Self {
        self.status = Some(status);
        self
    }

    pub fn skills(&self) -> &SkillLibrary {
        &self.skills
    }

    pub fn daily_log(&self) -> &DailyLog {
        &self.daily_log
    }

    /// Apply `directives` in order. A failed directive is recorded and the
    /// rest still run. Jobs created here target `conversation_id`.
    pub async fn apply(&self, directives: &[Directive], conversation_id: &str) -> ApplyReport {
        let mut report = ApplyReport::default();
        for directive in directives {
            let result = self.apply_one(directive, conversation_id).await;
            match &result {
                Ok(()) => info!(
                    "applied directive (directive={}, conversation={})",
                    directive, conversation_id
                ),
                Err(err) => warn!(
                    "directive failed (directive={}, conversation={}, err={})",
                    directive, conversation_id, err
                ),
            }
            report.outcomes.push(DirectiveOutcome {
                directive: directive.clone(),
                result,
            });
        }
        if report.mutated() {
            if let Some(status) = &self.status {
                status.refresh();
            }
        }
        report
    }

    async fn apply_one(
        &self,
        directive: &Directive,
        conversation_id: &str,
    ) -> Result<(), KairosCoreError> {
        match directive {
            Directive::MemorySave { key, value, tags } => {
                self.memory.save(key, value, tags)?;
            }
            Directive::MemoryDelete { key } => {
                if !self.memory.delete(key)? {
                    info!("memory key already absent (key={key})");
                }
            }
            Directive::ScheduleCreate { name, prompt, when } => {
                let (cron, once_at) = match when {
                    ScheduleSpec::Cron(cron) => (Some(cron.clone()), None),
                    ScheduleSpec::At(at) => (None, Some(at.clone())),
                };
                self.jobs.create(JobRequest {
                    name: name.clone(),
                    target_conversation_id: conversation_id.to_string(),
                    prompt: prompt.clone(),
                    cron,
                    once_at,
                })?;
            }
            Directive::SkillCreate {
                name,
                description,
                body,
            } => {
                self.skills.create(name, description, body)?;
            }
            Directive::DailyLog { text } => {
                self.daily_log.append(text)?;
            }
            Directive::Notify { title, message } => {
                if !self.notifications_enabled {
                    info!("notifications disabled, skipping (title={title})");
                    return Ok(());
                }
                self.notifier
                    .notify(title, message)
                    .await
                    .map_err(|err| KairosCoreError::Notify(err.to_string()))?;
            }
        }
        Ok(())
    }
}
