//! Job schedules: a daily `HH:MM` shorthand, a five-field cron expression,
//! or a single absolute instant.

use crate::StoreError;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Timelike, Utc};
use croner::Cron;
use std::fmt;

/// Recurring schedule evaluated at minute granularity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CronSchedule {
    /// Fires once a day at the given wall-clock time.
    Daily { hour: u32, minute: u32 },
    /// Standard five-field cron expression.
    Expression(String),
}

impl CronSchedule {
    /// Parse `HH:MM` or a five-field cron expression.
    pub fn parse(value: &str) -> Result<Self, StoreError> {
        let value = value.trim();
        if let Some(daily) = parse_daily(value) {
            return daily;
        }
        let fields = value.split_whitespace().count();
        if fields != 5 {
            return Err(StoreError::InvalidSchedule(format!(
                "cron {value:?} must be HH:MM or have 5 fields (got {fields})"
            )));
        }
        let normalized = value.split_whitespace().collect::<Vec<_>>().join(" ");
        compile(&normalized)?;
        Ok(CronSchedule::Expression(normalized))
    }

    /// Whether the schedule fires during the minute containing `at`, read in
    /// `at`'s own time zone.
    pub fn matches<Tz: TimeZone>(&self, at: &DateTime<Tz>) -> bool {
        match self {
            CronSchedule::Daily { hour, minute } => at.hour() == *hour && at.minute() == *minute,
            CronSchedule::Expression(expr) => {
                let Ok(cron) = compile(expr) else {
                    return false;
                };
                let minute_start = at
                    .with_second(0)
                    .and_then(|at| at.with_nanosecond(0))
                    .unwrap_or_else(|| at.clone());
                cron.is_time_matching(&minute_start).unwrap_or(false)
            }
        }
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CronSchedule::Daily { hour, minute } => write!(f, "{hour:02}:{minute:02}"),
            CronSchedule::Expression(expr) => f.write_str(expr),
        }
    }
}

fn parse_daily(value: &str) -> Option<Result<CronSchedule, StoreError>> {
    let (hour, minute) = value.split_once(':')?;
    if hour.is_empty()
        || hour.len() > 2
        || minute.len() != 2
        || !hour.chars().all(|c| c.is_ascii_digit())
        || !minute.chars().all(|c| c.is_ascii_digit())
    {
        return None;
    }
    let hour: u32 = hour.parse().ok()?;
    let minute: u32 = minute.parse().ok()?;
    if hour > 23 || minute > 59 {
        return Some(Err(StoreError::InvalidSchedule(format!(
            "time of day {value:?} is out of range"
        ))));
    }
    Some(Ok(CronSchedule::Daily { hour, minute }))
}

fn compile(expr: &str) -> Result<Cron, StoreError> {
    Cron::new(expr)
        .parse()
        .map_err(|err| StoreError::InvalidSchedule(format!("cron {expr:?}: {err}")))
}

/// When a job fires. Exactly one variant, so a job can never carry both or
/// neither kind of schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSchedule {
    Recurring(CronSchedule),
    OneShot(DateTime<Utc>),
}

impl JobSchedule {
    /// Build a schedule from the optional raw fields of a job request.
    ///
    /// Exactly one of `cron` and `once_at` must be present and non-blank.
    /// A one-shot instant must not be earlier than the start of `now`'s
    /// minute.
    pub fn from_parts(
        cron: Option<&str>,
        once_at: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Self, StoreError> {
        let cron = cron.map(str::trim).filter(|value| !value.is_empty());
        let once_at = once_at.map(str::trim).filter(|value| !value.is_empty());
        match (cron, once_at) {
            (Some(_), Some(_)) => Err(StoreError::InvalidSchedule(
                "set either cron or at, not both".to_string(),
            )),
            (None, None) => Err(StoreError::InvalidSchedule(
                "one of cron or at is required".to_string(),
            )),
            (Some(cron), None) => Ok(JobSchedule::Recurring(CronSchedule::parse(cron)?)),
            (None, Some(at)) => {
                let at = parse_instant(at)?;
                if minute_index(at) < minute_index(now) {
                    return Err(StoreError::InvalidSchedule(format!(
                        "time {} is in the past",
                        at.to_rfc3339()
                    )));
                }
                Ok(JobSchedule::OneShot(at))
            }
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(self, JobSchedule::OneShot(_))
    }
}

impl fmt::Display for JobSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobSchedule::Recurring(cron) => write!(f, "cron {cron}"),
            JobSchedule::OneShot(at) => write!(
                f,
                "once at {}",
                at.with_timezone(&Local).format("%Y-%m-%d %H:%M")
            ),
        }
    }
}

/// Parse an absolute instant.
///
/// Accepts RFC 3339, or `YYYY-MM-DD HH:MM[:SS]` (a `T` separator is also
/// accepted) read as local time.
pub fn parse_instant(value: &str) -> Result<DateTime<Utc>, StoreError> {
    let value = value.trim();
    if let Ok(at) = DateTime::parse_from_rfc3339(value) {
        return Ok(at.with_timezone(&Utc));
    }
    const FORMATS: &[&str] = &[
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M",
    ];
    for format in FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, format) {
            return Local
                .from_local_datetime(&naive)
                .earliest()
                .map(|at| at.with_timezone(&Utc))
                .ok_or_else(|| {
                    StoreError::InvalidSchedule(format!("{value:?} does not exist in local time"))
                });
        }
    }
    Err(StoreError::InvalidSchedule(format!(
        "unrecognised time {value:?}; use YYYY-MM-DD HH:MM or RFC 3339"
    )))
}

/// Whole minutes since the epoch.
pub(crate) fn minute_index<Tz: TimeZone>(at: DateTime<Tz>) -> i64 {
    at.timestamp().div_euclid(60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::FixedOffset;
    use pretty_assertions::assert_eq;

    fn utc(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .expect("rfc3339")
            .with_timezone(&Utc)
    }

    #[test]
    fn parses_daily_shorthand() {
        assert_eq!(
            CronSchedule::parse("7:05").expect("daily"),
            CronSchedule::Daily { hour: 7, minute: 5 }
        );
        assert_eq!(CronSchedule::parse("07:05").expect("daily").to_string(), "07:05");
        assert!(CronSchedule::parse("24:00").is_err());
        assert!(CronSchedule::parse("12:60").is_err());
    }

    #[test]
    fn parses_five_field_expressions_only() {
        let schedule = CronSchedule::parse("  0   9 * *  1-5 ").expect("cron");
        assert_eq!(schedule, CronSchedule::Expression("0 9 * * 1-5".to_string()));
        assert!(CronSchedule::parse("0 9 * *").is_err());
        assert!(CronSchedule::parse("0 0 9 * * 1").is_err());
        assert!(CronSchedule::parse("61 9 * * *").is_err());
        assert!(CronSchedule::parse("every day").is_err());
    }

    #[test]
    fn matching_uses_the_whole_minute() {
        let schedule = CronSchedule::parse("30 8 * * *").expect("cron");
        assert!(schedule.matches(&utc("2030-05-01T08:30:00Z")));
        assert!(schedule.matches(&utc("2030-05-01T08:30:59Z")));
        assert!(!schedule.matches(&utc("2030-05-01T08:31:00Z")));

        let daily = CronSchedule::parse("08:30").expect("daily");
        assert!(daily.matches(&utc("2030-05-01T08:30:42Z")));
        assert!(!daily.matches(&utc("2030-05-01T09:30:00Z")));
    }

    #[test]
    fn matching_reads_wall_clock_in_the_given_zone() {
        let schedule = CronSchedule::parse("08:00").expect("daily");
        let offset = FixedOffset::east_opt(9 * 3600).expect("offset");
        let local = utc("2030-05-01T23:00:00Z").with_timezone(&offset);
        assert!(schedule.matches(&local));
    }

    #[test]
    fn requires_exactly_one_schedule_field() {
        let now = utc("2030-01-01T00:00:00Z");
        assert!(JobSchedule::from_parts(Some("08:00"), Some("2030-02-01T00:00:00Z"), now).is_err());
        assert!(JobSchedule::from_parts(None, None, now).is_err());
        assert!(JobSchedule::from_parts(Some("  "), None, now).is_err());
        assert!(JobSchedule::from_parts(Some("08:00"), Some(""), now).is_ok());
    }

    #[test]
    fn one_shot_must_not_be_in_the_past() {
        let now = utc("2030-01-01T12:00:30Z");
        let same_minute =
            JobSchedule::from_parts(None, Some("2030-01-01T12:00:00Z"), now).expect("present");
        assert!(same_minute.is_one_shot());
        let err = JobSchedule::from_parts(None, Some("2030-01-01T11:59:00Z"), now).unwrap_err();
        assert!(matches!(err, StoreError::InvalidSchedule(_)));
    }

    #[test]
    fn instants_accept_rfc3339_and_local_forms() {
        assert_eq!(
            parse_instant("2030-01-01T09:00:00+02:00").expect("rfc"),
            utc("2030-01-01T07:00:00Z")
        );
        let naive = NaiveDateTime::parse_from_str("2030-01-01 09:00", "%Y-%m-%d %H:%M")
            .expect("naive");
        let expected = Local
            .from_local_datetime(&naive)
            .earliest()
            .expect("local")
            .with_timezone(&Utc);
        assert_eq!(parse_instant("2030-01-01 09:00").expect("space"), expected);
        assert_eq!(parse_instant("2030-01-01T09:00").expect("t"), expected);
        assert!(parse_instant("tomorrow").is_err());
    }
}
