//! Persisted recurring and one-shot jobs, plus the "what is due now" query.
//!
//! The store never calls the model or delivers anything. It only hands out due
//! jobs and records runs, so schedule bookkeeping stays independent of
//! delivery failures.

use crate::StoreError;
use crate::db::{Database, from_micros, to_micros};
use crate::schedule::{CronSchedule, JobSchedule, minute_index};
use chrono::{DateTime, TimeZone, Utc};
use kairos_rs_protocol::ConversationId;
use log::{debug, info};
use rusqlite::{OptionalExtension, Row, params};

/// Unvalidated job definition, as issued by a directive or heartbeat action.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobRequest {
    pub name: String,
    pub target_conversation_id: ConversationId,
    pub prompt: String,
    pub cron: Option<String>,
    pub once_at: Option<String>,
}

/// A stored job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: i64,
    pub name: String,
    pub target_conversation_id: ConversationId,
    pub prompt: String,
    pub schedule: JobSchedule,
    pub enabled: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    /// Whether the job should fire at `now`.
    ///
    /// Recurring jobs fire when the cron matches `now`'s minute and they have
    /// not already run in that minute. One-shot jobs fire once their instant
    /// has passed.
    pub fn is_due<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> bool {
        if !self.enabled {
            return false;
        }
        match &self.schedule {
            JobSchedule::Recurring(cron) => {
                let ran_this_minute = self
                    .last_run_at
                    .is_some_and(|last| minute_index(last) == minute_index(now.clone()));
                cron.matches(now) && !ran_this_minute
            }
            JobSchedule::OneShot(at) => *at <= now.with_timezone(&Utc),
        }
    }
}

const SELECT_COLUMNS: &str = "id, name, target_conversation_id, prompt, cron, once_at, enabled, \
                              last_run_at, created_at";

/// Handle to the jobs table.
#[derive(Clone)]
pub struct JobStore {
    db: Database,
}

impl JobStore {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Validate and persist a new job.
    pub fn create(&self, request: JobRequest) -> Result<ScheduledJob, StoreError> {
        self.create_at(request, Utc::now())
    }

    /// Create with an explicit clock reading for the "not in the past" check.
    pub fn create_at(
        &self,
        request: JobRequest,
        now: DateTime<Utc>,
    ) -> Result<ScheduledJob, StoreError> {
        let name = request.name.trim().to_string();
        if name.is_empty() {
            return Err(StoreError::InvalidJob("name is required".to_string()));
        }
        let prompt = request.prompt.trim().to_string();
        if prompt.is_empty() {
            return Err(StoreError::InvalidJob("prompt is required".to_string()));
        }
        let target = request.target_conversation_id.trim().to_string();
        if target.is_empty() {
            return Err(StoreError::InvalidJob(
                "target conversation is required".to_string(),
            ));
        }
        let schedule =
            JobSchedule::from_parts(request.cron.as_deref(), request.once_at.as_deref(), now)?;
        let (cron, once_at) = schedule_columns(&schedule);

        let job = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let exists: Option<i64> = tx
                .query_row("SELECT id FROM jobs WHERE name = ?1", params![name], |row| {
                    row.get(0)
                })
                .optional()?;
            if exists.is_some() {
                return Err(StoreError::DuplicateName(name.clone()));
            }
            tx.execute(
                "INSERT INTO jobs (name, target_conversation_id, prompt, cron, once_at, enabled, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6)",
                params![name, target, prompt, cron, once_at, to_micros(now)],
            )?;
            let id = tx.last_insert_rowid();
            tx.commit()?;
            Ok(ScheduledJob {
                id,
                name: name.clone(),
                target_conversation_id: target.clone(),
                prompt: prompt.clone(),
                schedule,
                enabled: true,
                last_run_at: None,
                created_at: from_micros(to_micros(now))?,
            })
        })?;
        info!(
            "created job (name={}, schedule={}, target={})",
            job.name, job.schedule, job.target_conversation_id
        );
        Ok(job)
    }

    /// Enabled jobs that should fire at `now`.
    ///
    /// Cron fields are matched against `now`'s wall clock in its own zone.
    pub fn due_jobs<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Result<Vec<ScheduledJob>, StoreError> {
        let due: Vec<ScheduledJob> = self
            .list_enabled()?
            .into_iter()
            .filter(|job| job.is_due(now))
            .collect();
        if !due.is_empty() {
            debug!("jobs due (count={})", due.len());
        }
        Ok(due)
    }

    /// Record a run. One-shot jobs are disabled; recurring jobs stay enabled.
    pub fn mark_run(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let updated = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "UPDATE jobs
                 SET last_run_at = ?2,
                     enabled = CASE WHEN once_at IS NOT NULL THEN 0 ELSE enabled END
                 WHERE id = ?1",
                params![id, to_micros(now)],
            )?)
        })?;
        if updated == 0 {
            return Err(StoreError::JobNotFound(id));
        }
        debug!("marked job run (id={id})");
        Ok(())
    }

    /// Remove a job by name, returning whether it existed.
    pub fn remove(&self, name: &str) -> Result<bool, StoreError> {
        let name = name.trim();
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM jobs WHERE name = ?1", params![name])?)
        })?;
        info!("removed job (name={}, existed={})", name, removed > 0);
        Ok(removed > 0)
    }

    pub fn get(&self, name: &str) -> Result<Option<ScheduledJob>, StoreError> {
        let name = name.trim();
        self.db.with_conn(|conn| {
            conn.query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM jobs WHERE name = ?1"),
                params![name],
                RawJob::from_row,
            )
            .optional()?
            .map(RawJob::into_job)
            .transpose()
        })
    }

    /// All jobs ordered by name.
    pub fn list(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        self.query(&format!("SELECT {SELECT_COLUMNS} FROM jobs ORDER BY name"))
    }

    pub fn list_enabled(&self) -> Result<Vec<ScheduledJob>, StoreError> {
        self.query(&format!(
            "SELECT {SELECT_COLUMNS} FROM jobs WHERE enabled = 1 ORDER BY name"
        ))
    }

    fn query(&self, sql: &str) -> Result<Vec<ScheduledJob>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let rows = stmt.query_map([], RawJob::from_row)?;
            let mut jobs = Vec::new();
            for row in rows {
                jobs.push(row?.into_job()?);
            }
            Ok(jobs)
        })
    }
}

fn schedule_columns(schedule: &JobSchedule) -> (Option<String>, Option<i64>) {
    match schedule {
        JobSchedule::Recurring(cron) => (Some(cron.to_string()), None),
        JobSchedule::OneShot(at) => (None, Some(to_micros(*at))),
    }
}

struct RawJob {
    id: i64,
    name: String,
    target_conversation_id: String,
    prompt: String,
    cron: Option<String>,
    once_at: Option<i64>,
    enabled: bool,
    last_run_at: Option<i64>,
    created_at: i64,
}

impl RawJob {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            target_conversation_id: row.get(2)?,
            prompt: row.get(3)?,
            cron: row.get(4)?,
            once_at: row.get(5)?,
            enabled: row.get(6)?,
            last_run_at: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_job(self) -> Result<ScheduledJob, StoreError> {
        let schedule = match (self.cron, self.once_at) {
            (Some(cron), None) => JobSchedule::Recurring(
                CronSchedule::parse(&cron)
                    .map_err(|err| StoreError::Corrupt(format!("job {}: {err}", self.name)))?,
            ),
            (None, Some(at)) => JobSchedule::OneShot(from_micros(at)?),
            _ => {
                return Err(StoreError::Corrupt(format!(
                    "job {} has an invalid schedule",
                    self.name
                )));
            }
        };
        Ok(ScheduledJob {
            id: self.id,
            name: self.name,
            target_conversation_id: self.target_conversation_id,
            prompt: self.prompt,
            schedule,
            enabled: self.enabled,
            last_run_at: self.last_run_at.map(from_micros).transpose()?,
            created_at: from_micros(self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    fn store() -> JobStore {
        Database::open_in_memory().expect("db").jobs()
    }

    fn request(name: &str, cron: Option<&str>, once_at: Option<&str>) -> JobRequest {
        JobRequest {
            name: name.to_string(),
            target_conversation_id: "1".to_string(),
            prompt: format!("run {name}"),
            cron: cron.map(str::to_string),
            once_at: once_at.map(str::to_string),
        }
    }

    #[test]
    fn create_rejects_both_or_neither_schedule_without_persisting() {
        let store = store();
        let now = utc("2030-01-01T00:00:00Z");
        let both = store
            .create_at(
                request("both", Some("08:00"), Some("2030-01-02T00:00:00Z")),
                now,
            )
            .unwrap_err();
        assert!(matches!(both, StoreError::InvalidSchedule(_)));
        let neither = store.create_at(request("neither", None, None), now).unwrap_err();
        assert!(matches!(neither, StoreError::InvalidSchedule(_)));
        assert!(store.list().expect("list").is_empty());
    }

    #[test]
    fn create_rejects_duplicate_names() {
        let store = store();
        let now = utc("2030-01-01T00:00:00Z");
        store
            .create_at(request("tea", Some("15:00"), None), now)
            .expect("create");
        let err = store
            .create_at(request("tea", Some("16:00"), None), now)
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateName(name) if name == "tea"));
        assert_eq!(store.list().expect("list").len(), 1);
    }

    #[test]
    fn create_rejects_bad_cron_and_past_instants() {
        let store = store();
        let now = utc("2030-01-01T00:00:00Z");
        assert!(
            store
                .create_at(request("bad", Some("not a cron"), None), now)
                .unwrap_err()
                .is_validation()
        );
        assert!(
            store
                .create_at(request("past", None, Some("2029-12-31T23:00:00Z")), now)
                .unwrap_err()
                .is_validation()
        );
    }

    #[test]
    fn recurring_job_fires_once_per_matching_minute() {
        let store = store();
        let created = store
            .create_at(
                request("standup", Some("0 9 * * *"), None),
                utc("2030-01-01T00:00:00Z"),
            )
            .expect("create");

        let nine = utc("2030-01-01T09:00:05Z");
        let due = store.due_jobs(&nine).expect("due");
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].prompt, "run standup");

        store.mark_run(created.id, nine).expect("mark");
        assert!(store.due_jobs(&utc("2030-01-01T09:00:40Z")).expect("due").is_empty());
        assert!(store.due_jobs(&utc("2030-01-01T09:01:00Z")).expect("due").is_empty());

        let next_day = utc("2030-01-02T09:00:00Z");
        assert_eq!(store.due_jobs(&next_day).expect("due").len(), 1);
        let job = store.get("standup").expect("get").expect("job");
        assert!(job.enabled);
        assert_eq!(job.last_run_at, Some(nine));
    }

    #[test]
    fn one_shot_job_is_disabled_after_run() {
        let store = store();
        let job = store
            .create_at(
                request("call mom", None, Some("2030-01-01T10:00:00Z")),
                utc("2030-01-01T00:00:00Z"),
            )
            .expect("create");
        assert!(store.due_jobs(&utc("2030-01-01T09:59:59Z")).expect("due").is_empty());

        let later = utc("2030-01-01T10:30:00Z");
        assert_eq!(store.due_jobs(&later).expect("due").len(), 1);
        store.mark_run(job.id, later).expect("mark");
        assert!(store.due_jobs(&later).expect("due").is_empty());

        let stored = store.get("call mom").expect("get").expect("job");
        assert!(!stored.enabled);
        assert_eq!(stored.last_run_at, Some(later));
    }

    #[test]
    fn remove_and_mark_missing() {
        let store = store();
        store
            .create_at(request("x", Some("08:00"), None), utc("2030-01-01T00:00:00Z"))
            .expect("create");
        assert!(store.remove("x").expect("remove"));
        assert!(!store.remove("x").expect("remove again"));
        assert!(matches!(
            store.mark_run(99, utc("2030-01-01T00:00:00Z")),
            Err(StoreError::JobNotFound(99))
        ));
    }
}
