//! Periodic proactive loop: job dispatch, history compaction, and one
//! model-chosen action per tick.

use crate::directives::{Directive, ScheduleSpec, parse_reply};
use crate::error::KairosCoreError;
use crate::retry::{RetryPolicy, retry};
use crate::services::Services;
use chrono::{DateTime, Local, NaiveTime, Utc};
use kairos_rs_config::{ActiveHours, CompactionFailurePolicy, ConfigError, KairosConfig};
use kairos_rs_protocol::{HeartbeatAction, Role};
use kairos_rs_store::ScheduledJob;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// States visited during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Idle,
    /// Checking the active-hours window.
    Gated,
    Assembling,
    Deciding,
    Executing,
}

/// Time-of-day range in which ticks may act. Wraps past midnight when
/// `start > end`; `start == end` covers the whole day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ActiveWindow {
    pub fn new(start: NaiveTime, end: NaiveTime) -> Self {
        Self { start, end }
    }

    pub fn from_hours(hours: &ActiveHours) -> Result<Self, ConfigError> {
        let (start, end) = hours.bounds().map_err(|message| ConfigError::InvalidField {
            path: "heartbeat.active_hours".to_string(),
            message,
        })?;
        Ok(Self::new(start, end))
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start == self.end {
            true
        } else if self.start < self.end {
            self.start <= time && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// How a tick ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Outside active hours; nothing ran.
    Gated,
    /// The model chose an action and it was executed (or attempted).
    Decided(HeartbeatAction),
    /// Context assembly or the decision call failed.
    Failed(String),
}

/// Summary of one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub states: Vec<HeartbeatState>,
    pub outcome: TickOutcome,
    pub jobs_dispatched: usize,
    pub compactions: usize,
    /// Absorbed sub-step failures.
    pub errors: Vec<String>,
}

impl TickReport {
    fn new() -> Self {
        Self {
            states: vec![HeartbeatState::Idle],
            outcome: TickOutcome::Decided(HeartbeatAction::None),
            jobs_dispatched: 0,
            compactions: 0,
            errors: Vec::new(),
        }
    }

    fn enter(&mut self, state: HeartbeatState) {
        debug!("heartbeat state (state={state:?})");
        self.states.push(state);
    }
}

#[derive(Debug, Clone)]
pub struct HeartbeatSettings {
    pub enabled: bool,
    pub interval: Duration,
    pub job_poll: Duration,
    pub active_window: Option<ActiveWindow>,
    pub compaction_policy: CompactionFailurePolicy,
    /// Extra compaction attempts under the `retry` policy.
    pub compaction_retry_attempts: u32,
    pub compaction_retry_delay: Duration,
}

impl HeartbeatSettings {
    pub fn from_config(config: &KairosConfig) -> Result<Self, ConfigError> {
        let active_window = config
            .heartbeat
            .active_hours
            .as_ref()
            .map(ActiveWindow::from_hours)
            .transpose()?;
        Ok(Self {
            enabled: config.heartbeat.enabled,
            interval: config.heartbeat.interval(),
            job_poll: config.heartbeat.job_poll(),
            active_window,
            compaction_policy: config.history.compaction_on_failure,
            compaction_retry_attempts: config.history.compaction_retry_attempts,
            compaction_retry_delay: config.retry.base_delay(),
        })
    }
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(3600),
            job_poll: Duration::from_secs(60),
            active_window: None,
            compaction_policy: CompactionFailurePolicy::Skip,
            compaction_retry_attempts: 2,
            compaction_retry_delay: Duration::from_secs(1),
        }
    }
}

/// The proactive loop.
pub struct Heartbeat {
    services: Services,
    settings: HeartbeatSettings,
    dispatch_lock: tokio::sync::Mutex<()>,
}

impl Heartbeat {
    pub fn new(services: Services, settings: HeartbeatSettings) -> Self {
        Self {
            services,
            settings,
            dispatch_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &HeartbeatSettings {
        &self.settings
    }

    pub async fn tick(&self) -> TickReport {
        self.tick_at(Local::now()).await
    }

    /// Run one tick as if the local time were `now`. Never fails; sub-step
    /// errors are logged and collected in the report.
    pub async fn tick_at(&self, now: DateTime<Local>) -> TickReport {
        let mut report = TickReport::new();
        report.enter(HeartbeatState::Gated);
        if let Some(window) = &self.settings.active_window {
            if !window.contains(now.time()) {
                debug!(
                    "heartbeat outside active hours (time={})",
                    now.format("%H:%M")
                );
                report.outcome = TickOutcome::Gated;
                report.enter(HeartbeatState::Idle);
                return report;
            }
        }

        report.enter(HeartbeatState::Assembling);
        match self.dispatch_due_jobs(now).await {
            Ok(count) => report.jobs_dispatched = count,
            Err(err) => report.errors.push(format!("job dispatch: {err}")),
        }
        match self.compact_due(now.with_timezone(&Utc)).await {
            Ok(count) => report.compactions = count,
            Err(err) => report.errors.push(format!("compaction: {err}")),
        }

        let home = self.services.home_conversation_id.clone();
        let messages = match self.services.context.heartbeat_messages(&home, now) {
            Ok(messages) => messages,
            Err(err) => return self.fail(report, format!("context: {err}")),
        };

        report.enter(HeartbeatState::Deciding);
        let raw = match self.services.complete(&messages).await {
            Ok(raw) => raw,
            Err(err) => return self.fail(report, format!("decision: {err}")),
        };
        let action = parse_action(&raw);
        info!("heartbeat decided (action={})", action.kind());

        report.enter(HeartbeatState::Executing);
        if let Err(err) = self.execute(&action).await {
            error!("heartbeat action failed (action={}, err={})", action.kind(), err);
            report.errors.push(format!("action {}: {err}", action.kind()));
        }
        report.outcome = TickOutcome::Decided(action);
        report.enter(HeartbeatState::Idle);
        info!(
            "heartbeat tick finished (jobs={}, compactions={}, errors={})",
            report.jobs_dispatched,
            report.compactions,
            report.errors.len()
        );
        report
    }

    fn fail(&self, mut report: TickReport, reason: String) -> TickReport {
        error!("heartbeat tick failed (err={reason})");
        report.errors.push(reason.clone());
        report.outcome = TickOutcome::Failed(reason);
        report.enter(HeartbeatState::Idle);
        report
    }

    /// Run every job due at `now` and return how many were dispatched.
    ///
    /// Each job is marked as run before its model call, so delivery failures
    /// never cause a second firing within the same minute.
    pub async fn dispatch_due_jobs(&self, now: DateTime<Local>) -> Result<usize, KairosCoreError> {
        let _guard = self.dispatch_lock.lock().await;
        let due = self.services.jobs.due_jobs(&now)?;
        let mut dispatched = 0;
        for job in due {
            if let Err(err) = self.services.jobs.mark_run(job.id, now.with_timezone(&Utc)) {
                error!("failed to mark job run (name={}, err={})", job.name, err);
                continue;
            }
            dispatched += 1;
            if let Err(err) = self.run_job(&job).await {
                error!("job failed (name={}, err={})", job.name, err);
            }
        }
        Ok(dispatched)
    }

    async fn run_job(&self, job: &ScheduledJob) -> Result<(), KairosCoreError> {
        info!(
            "running job (name={}, target={})",
            job.name, job.target_conversation_id
        );
        let reply = self
            .services
            .respond(&job.target_conversation_id, &job.prompt, false)
            .await?;
        self.services
            .deliver(&job.target_conversation_id, &reply.visible)
            .await
    }

    /// Compact every conversation that crossed its threshold and is out of
    /// cooldown. Returns the number of compactions that completed.
    pub async fn compact_due(&self, now: DateTime<Utc>) -> Result<usize, KairosCoreError> {
        let history = &self.services.history;
        let mut completed = 0;
        for conversation_id in history.conversations()? {
            if !history.should_compact_at(&conversation_id, now)? {
                continue;
            }
            match self.compact(&conversation_id).await {
                Ok(saved) => {
                    history.record_flush_at(&conversation_id, now)?;
                    completed += 1;
                    info!(
                        "compacted history (conversation={}, saved={})",
                        conversation_id, saved
                    );
                }
                Err(err) => warn!(
                    "compaction skipped (conversation={}, policy={:?}, err={})",
                    conversation_id, self.settings.compaction_policy, err
                ),
            }
        }
        Ok(completed)
    }

    async fn compact(&self, conversation_id: &str) -> Result<usize, KairosCoreError> {
        let history = &self.services.history;
        let entries = history.recent(conversation_id, history.limits().max_messages)?;
        let messages = self.services.context.compaction_messages(&entries)?;
        let extra = match self.settings.compaction_policy {
            CompactionFailurePolicy::Skip => 0,
            CompactionFailurePolicy::Retry => self.settings.compaction_retry_attempts,
        };
        let policy = RetryPolicy::new(1 + extra, self.settings.compaction_retry_delay);
        let raw = retry(policy, "compaction", KairosCoreError::is_external, || {
            self.services.complete(&messages)
        })
        .await?;

        let saves: Vec<Directive> = parse_reply(&raw)
            .directives
            .into_iter()
            .filter(|directive| matches!(directive, Directive::MemorySave { .. }))
            .collect();
        let report = self.services.executor.apply(&saves, conversation_id).await;
        Ok(report.applied_count())
    }

    async fn execute(&self, action: &HeartbeatAction) -> Result<(), KairosCoreError> {
        let home = self.services.home_conversation_id.as_str();
        match action {
            HeartbeatAction::None => Ok(()),
            HeartbeatAction::Message { content } => {
                let content = content.trim();
                if content.is_empty() {
                    return Ok(());
                }
                self.services.deliver(home, content).await?;
                self.services.history.append(home, Role::Assistant, content)?;
                Ok(())
            }
            HeartbeatAction::Task { content } => {
                let task = content.trim();
                if task.is_empty() {
                    return Ok(());
                }
                self.run_task(task).await
            }
            HeartbeatAction::Schedule {
                name,
                prompt,
                cron,
                at,
            } => {
                let cron = cron.as_deref().map(str::trim).filter(|v| !v.is_empty());
                let at = at.as_deref().map(str::trim).filter(|v| !v.is_empty());
                let when = match (cron, at) {
                    (Some(cron), None) => ScheduleSpec::Cron(cron.to_string()),
                    (None, Some(at)) => ScheduleSpec::At(at.to_string()),
                    _ => {
                        return Err(KairosCoreError::Store(
                            kairos_rs_store::StoreError::InvalidSchedule(
                                "schedule action needs exactly one of cron or at".to_string(),
                            ),
                        ));
                    }
                };
                let directive = Directive::ScheduleCreate {
                    name: name.clone(),
                    prompt: prompt.clone(),
                    when,
                };
                let mut report = self.services.executor.apply(&[directive], home).await;
                match report.outcomes.pop().map(|outcome| outcome.result) {
                    Some(Err(err)) => Err(err),
                    _ => Ok(()),
                }
            }
        }
    }

    async fn run_task(&self, task: &str) -> Result<(), KairosCoreError> {
        let home = self.services.home_conversation_id.as_str();
        info!("running background task (task={task})");
        self.services
            .deliver(home, &format!("Starting background task: {task}"))
            .await?;
        let messages = self.services.context.task_messages(task);
        let summary = match self.services.complete(&messages).await {
            Ok(raw) => {
                let reply = self.services.digest(&raw, home).await;
                format!("Task complete: {task}\n\n{}", reply.visible)
            }
            Err(err) => {
                error!("background task failed (task={task}, err={err})");
                format!("Task failed: {task}\n\nError: {err}")
            }
        };
        self.services.deliver(home, &summary).await?;
        self.services.history.append(home, Role::Assistant, &summary)?;
        Ok(())
    }

    /// Drive the heartbeat and the job poll until `shutdown` becomes true or
    /// its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut heartbeat = tokio::time::interval(self.settings.interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
        heartbeat.tick().await;
        let mut poll = tokio::time::interval(self.settings.job_poll);
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            "heartbeat started (enabled={}, interval_secs={}, job_poll_secs={})",
            self.settings.enabled,
            self.settings.interval.as_secs(),
            self.settings.job_poll.as_secs()
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = heartbeat.tick(), if self.settings.enabled => {
                    self.tick().await;
                }
                _ = poll.tick() => {
                    if let Err(err) = self.dispatch_due_jobs(Local::now()).await {
                        error!("job poll failed (err={err})");
                    }
                }
            }
        }
        info!("heartbeat stopped");
    }
}

/// Extract the JSON action between the first `{` and the last `}`.
/// Anything unparseable is `none`.
pub fn parse_action(raw: &str) -> HeartbeatAction {
    let raw = raw.trim();
    if let (Some(start), Some(end)) = (raw.find('{'), raw.rfind('}')) {
        if start < end {
            match serde_json::from_str(&raw[start..=end]) {
                Ok(action) => return action,
                Err(err) => warn!("unparseable heartbeat action (err={err})"),
            }
        }
    }
    warn!("no heartbeat action found, defaulting to none");
    HeartbeatAction::None
}
