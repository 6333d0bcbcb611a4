//! Append-only audit log of processed simulation results.

use crate::message::SimulationOutcome;
use crate::progress::UserId;
use crate::stage::StageId;
use crate::store::StoreFuture;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Log entry to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLogEntry {
    /// User the result belongs to
    pub user_id: UserId,
    /// Stage the result belongs to
    pub stage_id: StageId,
    /// Attempt number carried by the message
    pub attempt_number: u32,
    /// Verdict
    pub result: SimulationOutcome,
    /// Worker's summary
    pub message: String,
    /// Worker's output payload
    pub payload: serde_json::Value,
    /// Time the worker produced the verdict
    pub timestamp: DateTime<Utc>,
}

/// Persisted audit log entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimulationLogEntry {
    /// Store-assigned sequence id
    pub id: i64,
    /// User the result belongs to
    pub user_id: UserId,
    /// Stage the result belongs to
    pub stage_id: StageId,
    /// Attempt number carried by the message
    pub attempt_number: u32,
    /// Verdict
    pub result: SimulationOutcome,
    /// Worker's summary
    pub message: String,
    /// Worker's output payload
    pub payload: serde_json::Value,
    /// Time the worker produced the verdict
    pub timestamp: DateTime<Utc>,
    /// Time the orchestrator recorded the entry
    pub recorded_at: DateTime<Utc>,
}

/// Counters over the whole audit log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogTotals {
    /// Number of entries
    pub total: u64,
    /// Entries whose result is success
    pub successes: u64,
}

impl LogTotals {
    /// Fraction of successful entries, `0.0` for an empty log.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.successes as f64 / self.total as f64
        }
    }
}

/// Append-only audit log.
///
/// Entries are never mutated or deleted. Duplicate messages produce duplicate
/// entries.
pub trait SimulationLog: Send + Sync {
    /// Append one entry and return it as stored.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](crate::store::StoreError::Database) on
    /// backend failure.
    fn append(&self, entry: NewLogEntry) -> StoreFuture<'_, SimulationLogEntry>;

    /// A user's entries ordered by the worker's timestamp, then by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](crate::store::StoreError::Database) on
    /// backend failure.
    fn list_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<SimulationLogEntry>>;

    /// Counters over the whole log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`](crate::store::StoreError::Database) on
    /// backend failure.
    fn log_totals(&self) -> StoreFuture<'_, LogTotals>;
}
