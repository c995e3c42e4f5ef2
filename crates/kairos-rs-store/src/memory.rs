//! Process-wide key/value memory with tags and full-text search.
//!
//! Every multi-record read orders by `updated_at` descending with `key` as the
//! tie-breaker, so callers that truncate a result keep the freshest facts.

use crate::StoreError;
use crate::db::{Database, from_micros, to_micros};
use chrono::{DateTime, Utc};
use log::debug;
use rusqlite::{OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A durable fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemoryRecord {
    pub key: String,
    pub value: String,
    /// Sorted, de-duplicated tags.
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_COLUMNS: &str = "m.key, m.value, m.tags, m.created_at, m.updated_at";

/// Handle to the memory table.
#[derive(Clone)]
pub struct MemoryStore {
    db: Database,
}

impl MemoryStore {
    pub(crate) fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert or replace the record for `key`.
    pub fn save(
        &self,
        key: &str,
        value: &str,
        tags: &[String],
    ) -> Result<MemoryRecord, StoreError> {
        self.save_at(key, value, tags, Utc::now())
    }

    /// Upsert with an explicit clock reading.
    ///
    /// `updated_at` always moves forward by at least one microsecond, even
    /// when the clock reading is not later than the previous write.
    pub fn save_at(
        &self,
        key: &str,
        value: &str,
        tags: &[String],
        now: DateTime<Utc>,
    ) -> Result<MemoryRecord, StoreError> {
        let key = key.trim();
        if key.is_empty() {
            return Err(StoreError::InvalidKey);
        }
        let tags = normalize_tags(tags);
        let tags_json = serde_json::to_string(&tags)?;
        let now = to_micros(now);

        self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            let existing: Option<(i64, i64)> = tx
                .query_row(
                    "SELECT created_at, updated_at FROM memory WHERE key = ?1",
                    params![key],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            let (created_at, updated_at) = match existing {
                Some((created_at, previous)) => {
                    let updated_at = now.max(previous + 1);
                    tx.execute(
                        "UPDATE memory SET value = ?2, tags = ?3, updated_at = ?4 WHERE key = ?1",
                        params![key, value, tags_json, updated_at],
                    )?;
                    (created_at, updated_at)
                }
                None => {
                    tx.execute(
                        "INSERT INTO memory (key, value, tags, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![key, value, tags_json, now],
                    )?;
                    (now, now)
                }
            };
            tx.commit()?;
            debug!(
                "saved memory (key={}, tags={}, replaced={})",
                key,
                tags.len(),
                existing.is_some()
            );
            Ok(MemoryRecord {
                key: key.to_string(),
                value: value.to_string(),
                tags,
                created_at: from_micros(created_at)?,
                updated_at: from_micros(updated_at)?,
            })
        })
    }

    /// Delete `key`, returning whether a record existed.
    pub fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let key = key.trim();
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute("DELETE FROM memory WHERE key = ?1", params![key])?)
        })?;
        debug!("deleted memory (key={}, existed={})", key, removed > 0);
        Ok(removed > 0)
    }

    pub fn get(&self, key: &str) -> Result<Option<MemoryRecord>, StoreError> {
        let key = key.trim();
        self.db.with_conn(|conn| {
            let raw = conn
                .query_row(
                    &format!("SELECT {SELECT_COLUMNS} FROM memory m WHERE m.key = ?1"),
                    params![key],
                    RawRecord::from_row,
                )
                .optional()?;
            raw.map(RawRecord::into_record).transpose()
        })
    }

    /// Token search over key, value, and tags.
    ///
    /// Any token may match. A query without tokens returns nothing.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryRecord>, StoreError> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SELECT_COLUMNS}
                 FROM memory_fts f JOIN memory m ON m.id = f.rowid
                 WHERE memory_fts MATCH ?1
                 ORDER BY m.updated_at DESC, m.key ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![fts_query, limit as i64], RawRecord::from_row)?;
            collect_records(rows)
        })
    }

    /// Most recently touched records, optionally restricted to one tag.
    pub fn list_recent(
        &self,
        limit: usize,
        tag: Option<&str>,
    ) -> Result<Vec<MemoryRecord>, StoreError> {
        self.db.with_conn(|conn| match tag.map(str::trim) {
            Some(tag) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM memory m
                     WHERE EXISTS (SELECT 1 FROM json_each(m.tags) t WHERE t.value = ?1)
                     ORDER BY m.updated_at DESC, m.key ASC
                     LIMIT ?2"
                ))?;
                let rows = stmt.query_map(params![tag, limit as i64], RawRecord::from_row)?;
                collect_records(rows)
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {SELECT_COLUMNS} FROM memory m
                     ORDER BY m.updated_at DESC, m.key ASC
                     LIMIT ?1"
                ))?;
                let rows = stmt.query_map(params![limit as i64], RawRecord::from_row)?;
                collect_records(rows)
            }
        })
    }

    /// Every record, freshest first.
    pub fn list_all(&self) -> Result<Vec<MemoryRecord>, StoreError> {
        self.list_recent(i64::MAX as usize, None)
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM memory", [], |row| row.get(0))?;
            Ok(count as usize)
        })
    }
}

/// Row as stored, before timestamp and tag decoding.
struct RawRecord {
    key: String,
    value: String,
    tags: String,
    created_at: i64,
    updated_at: i64,
}

impl RawRecord {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            key: row.get(0)?,
            value: row.get(1)?,
            tags: row.get(2)?,
            created_at: row.get(3)?,
            updated_at: row.get(4)?,
        })
    }

    fn into_record(self) -> Result<MemoryRecord, StoreError> {
        Ok(MemoryRecord {
            tags: serde_json::from_str(&self.tags)?,
            created_at: from_micros(self.created_at)?,
            updated_at: from_micros(self.updated_at)?,
            key: self.key,
            value: self.value,
        })
    }
}

fn collect_records(
    rows: impl Iterator<Item = rusqlite::Result<RawRecord>>,
) -> Result<Vec<MemoryRecord>, StoreError> {
    let mut records = Vec::new();
    for row in rows {
        records.push(row?.into_record()?);
    }
    Ok(records)
}

fn normalize_tags(tags: &[String]) -> Vec<String> {
    tags.iter()
        .map(|tag| tag.trim())
        .filter(|tag| !tag.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Quote each whitespace token and OR them together.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split_whitespace()
        .map(|token| format!("\"{}\"", token.replace('"', "\"\"")))
        .collect();
    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" OR "))
    }
}
