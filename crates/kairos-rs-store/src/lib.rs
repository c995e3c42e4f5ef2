//! Durable state for Kairos: the process-wide memory store, per-conversation
//! history rings with compaction bookkeeping, and scheduled jobs.
//!
//! Everything lives in one SQLite database opened once at startup. Each store
//! handle shares the same connection behind a mutex, and every operation holds
//! that lock for its entire read or read-modify-write.

pub mod db;
pub mod error;
pub mod history;
pub mod jobs;
pub mod memory;
pub mod schedule;

/// Shared database handle.
pub use db::Database;
/// Store error type.
pub use error::StoreError;
/// History ring and compaction bookkeeping.
pub use history::{HistoryEntry, HistoryLimits, HistoryRing};
/// Job store and dispatcher.
pub use jobs::{JobRequest, JobStore, ScheduledJob};
/// Memory store.
pub use memory::{MemoryRecord, MemoryStore};
/// Schedule types.
pub use schedule::{CronSchedule, JobSchedule};
