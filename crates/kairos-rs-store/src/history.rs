//! Per-conversation bounded history and compaction bookkeeping.

use crate::StoreError;
use crate::db::{Database, from_micros, to_micros};
use chrono::{DateTime, Duration, Utc};
use kairos_rs_protocol::{ChatMessage, ConversationId, Role};
use log::{debug, info};
use rusqlite::{OptionalExtension, params};
use serde::{Deserialize, Serialize};

/// One stored turn.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryEntry {
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl HistoryEntry {
    pub fn to_chat_message(&self) -> ChatMessage {
        ChatMessage {
            role: self.role,
            content: self.content.clone(),
        }
    }
}

/// Capacity and compaction trigger settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistoryLimits {
    /// Maximum stored turns per conversation.
    pub max_messages: usize,
    /// Fill fraction at which compaction becomes eligible.
    pub compaction_threshold: f64,
    /// Minimum time between two compactions of one conversation.
    pub compaction_cooldown: Duration,
}

impl Default for HistoryLimits {
    fn default() -> Self {
        Self {
            max_messages: 50,
            compaction_threshold: 0.8,
            compaction_cooldown: Duration::hours(4),
        }
    }
}

/// Handle to the history and compaction tables.
#[derive(Clone)]
pub struct HistoryRing {
    db: Database,
    limits: HistoryLimits,
}

impl HistoryRing {
    pub(crate) fn new(db: Database, limits: HistoryLimits) -> Self {
        let max_messages = limits.max_messages.max(1);
        Self {
            db,
            limits: HistoryLimits {
                max_messages,
                ..limits
            },
        }
    }

    pub fn limits(&self) -> HistoryLimits {
        self.limits
    }

    /// Append a turn, then evict the oldest turns beyond the cap.
    pub fn append(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
    ) -> Result<HistoryEntry, StoreError> {
        self.append_at(conversation_id, role, content, Utc::now())
    }

    pub fn append_at(
        &self,
        conversation_id: &str,
        role: Role,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<HistoryEntry, StoreError> {
        let now = to_micros(now);
        let evicted = self.db.with_conn(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO history (conversation_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![conversation_id, role.as_str(), content, now],
            )?;
            let evicted = tx.execute(
                "DELETE FROM history
                 WHERE conversation_id = ?1
                   AND id NOT IN (
                       SELECT id FROM history WHERE conversation_id = ?1
                       ORDER BY id DESC LIMIT ?2
                   )",
                params![conversation_id, self.limits.max_messages as i64],
            )?;
            tx.commit()?;
            Ok(evicted)
        })?;
        if evicted > 0 {
            debug!(
                "evicted history (conversation={}, count={})",
                conversation_id, evicted
            );
        }
        Ok(HistoryEntry {
            conversation_id: conversation_id.to_string(),
            role,
            content: content.to_string(),
            created_at: from_micros(now)?,
        })
    }

    /// Up to `limit` most recent turns, oldest first.
    pub fn recent(&self, conversation_id: &str, limit: usize) -> Result<Vec<HistoryEntry>, StoreError> {
        let mut entries = self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT role, content, created_at FROM history
                 WHERE conversation_id = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![conversation_id, limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            let mut entries = Vec::new();
            for row in rows {
                let (role, content, created_at) = row?;
                entries.push(HistoryEntry {
                    conversation_id: conversation_id.to_string(),
                    role: Role::parse(&role),
                    content,
                    created_at: from_micros(created_at)?,
                });
            }
            Ok(entries)
        })?;
        entries.reverse();
        Ok(entries)
    }

    /// Drop every turn of a conversation, returning how many were removed.
    ///
    /// The compaction cooldown is left untouched.
    pub fn clear(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let removed = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "DELETE FROM history WHERE conversation_id = ?1",
                params![conversation_id],
            )?)
        })?;
        info!(
            "cleared history (conversation={}, removed={})",
            conversation_id, removed
        );
        Ok(removed)
    }

    pub fn count(&self, conversation_id: &str) -> Result<usize, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM history WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get(0),
            )?;
            Ok(count as usize)
        })
    }

    /// `count / max_messages`, within `[0, 1]`.
    pub fn size_fraction(&self, conversation_id: &str) -> Result<f64, StoreError> {
        let count = self.count(conversation_id)?;
        Ok((count as f64 / self.limits.max_messages as f64).min(1.0))
    }

    /// Conversations that currently hold history, in id order.
    pub fn conversations(&self) -> Result<Vec<ConversationId>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT DISTINCT conversation_id FROM history ORDER BY conversation_id",
            )?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
    }

    pub fn should_compact(&self, conversation_id: &str) -> Result<bool, StoreError> {
        self.should_compact_at(conversation_id, Utc::now())
    }

    /// True when the fill fraction reached the threshold and the cooldown has
    /// elapsed since the last recorded flush.
    pub fn should_compact_at(
        &self,
        conversation_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        if self.size_fraction(conversation_id)? < self.limits.compaction_threshold {
            return Ok(false);
        }
        Ok(match self.last_flush(conversation_id)? {
            Some(last) => now - last >= self.limits.compaction_cooldown,
            None => true,
        })
    }

    pub fn last_flush(&self, conversation_id: &str) -> Result<Option<DateTime<Utc>>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT last_flush_at FROM compaction_state WHERE conversation_id = ?1",
                params![conversation_id],
                |row| row.get::<_, i64>(0),
            )
            .optional()?
            .map(from_micros)
            .transpose()
        })
    }

    /// Start the cooldown clock. Call once per compaction that actually ran.
    pub fn record_flush(&self, conversation_id: &str) -> Result<(), StoreError> {
        self.record_flush_at(conversation_id, Utc::now())
    }

    /// The stored flush time never moves backwards.
    pub fn record_flush_at(&self, conversation_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO compaction_state (conversation_id, last_flush_at) VALUES (?1, ?2)
                 ON CONFLICT(conversation_id)
                 DO UPDATE SET last_flush_at = MAX(last_flush_at, excluded.last_flush_at)",
                params![conversation_id, to_micros(now)],
            )?;
            Ok(())
        })?;
        info!("recorded compaction flush (conversation={conversation_id})");
        Ok(())
    }
}
