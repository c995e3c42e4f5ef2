//! Append-only narrative notes, one Markdown file per local date.

use crate::error::KairosCoreError;
use chrono::{DateTime, Days, Local, NaiveDate};
use log::debug;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct DailyLog {
    dir: PathBuf,
}

impl DailyLog {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!("{}.md", date.format("%Y-%m-%d")))
    }

    /// Append `- HH:MM: entry` to the file for `now`'s date, writing the
    /// `# YYYY-MM-DD` header when the file is new.
    pub fn append_at(&self, entry: &str, now: DateTime<Local>) -> Result<PathBuf, KairosCoreError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(now.date_naive());
        let is_new = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if is_new {
            writeln!(file, "# {}\n", now.format("%Y-%m-%d"))?;
        }
        let entry = entry.split_whitespace().collect::<Vec<_>>().join(" ");
        writeln!(file, "- {}: {}", now.format("%H:%M"), entry)?;
        debug!("appended daily log (path={})", path.display());
        Ok(path)
    }

    pub fn append(&self, entry: &str) -> Result<PathBuf, KairosCoreError> {
        self.append_at(entry, Local::now())
    }

    /// The last `days` days of logs ending at `today`, oldest first, as one
    /// `## Daily Log` prompt section. Empty when no file exists.
    pub fn render_recent(&self, days: u32, today: NaiveDate) -> String {
        let mut sections = Vec::new();
        for offset in (0..days).rev() {
            let Some(date) = today.checked_sub_days(Days::new(u64::from(offset))) else {
                continue;
            };
            let Ok(content) = fs::read_to_string(self.path_for(date)) else {
                continue;
            };
            let content = content.trim();
            if !content.is_empty() {
                sections.push(content.to_string());
            }
        }
        if sections.is_empty() {
            return String::new();
        }
        format!("## Daily Log\n\n{}", sections.join("\n\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Local> {
        Local
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .earliest()
            .expect("local time")
    }

    #[test]
    fn append_writes_header_once_and_flattens_entry() {
        let temp = tempdir().expect("tempdir");
        let log = DailyLog::new(temp.path().join("memory"));
        let path = log
            .append_at("Walked the dog\n  in the rain", local(2030, 3, 4, 9, 5))
            .expect("append");
        log.append_at("Lunch with Sam", local(2030, 3, 4, 12, 30))
            .expect("append");

        assert_eq!(
            fs::read_to_string(path).expect("read"),
            "# 2030-03-04\n\n- 09:05: Walked the dog in the rain\n- 12:30: Lunch with Sam\n"
        );
    }

    #[test]
    fn render_recent_includes_only_window() {
        let temp = tempdir().expect("tempdir");
        let log = DailyLog::new(temp.path());
        log.append_at("old", local(2030, 3, 1, 8, 0)).expect("append");
        log.append_at("yesterday", local(2030, 3, 3, 8, 0)).expect("append");
        log.append_at("today", local(2030, 3, 4, 8, 0)).expect("append");

        let today = NaiveDate::from_ymd_opt(2030, 3, 4).expect("date");
        let rendered = log.render_recent(2, today);
        assert_eq!(
            rendered,
            "## Daily Log\n\n# 2030-03-03\n\n- 08:00: yesterday\n\n# 2030-03-04\n\n- 08:00: today"
        );
        assert_eq!(DailyLog::new(temp.path().join("none")).render_recent(3, today), "");
    }
}
