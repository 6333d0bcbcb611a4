//! In-memory progress store and audit log.
//!
//! - [`InMemoryProgressStore`]: `HashMap`-backed [`ProgressStore`]
//! - [`InMemorySimulationLog`]: `Vec`-backed [`SimulationLog`]
//!
//! The store holds its write lock for the whole check-and-apply step of
//! `compare_and_transition`, which gives the same per-key atomicity as the
//! Postgres row lock.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on lock poisoning

use progression_core::environment::{Clock, SystemClock};
use progression_core::{
    LogTotals, NewLogEntry, ProgressStore, ProgressTotals, SimulationLog, SimulationLogEntry,
    StageCatalog, StageId, StageProgress, StageStatus, StoreError, StoreFuture, Transition,
    UserId,
};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

type Key = (UserId, StageId);

/// In-memory progress store for fast, deterministic testing.
///
/// Clones share the same data.
#[derive(Clone)]
pub struct InMemoryProgressStore {
    records: Arc<RwLock<HashMap<Key, StageProgress>>>,
    clock: Arc<dyn Clock>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryProgressStore {
    /// Create an empty store stamping writes with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store stamping writes with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            records: Arc::new(RwLock::new(HashMap::new())),
            clock,
            unavailable: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Make every operation fail with [`StoreError::Database`] until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Insert or replace a record directly, bypassing transition guards.
    ///
    /// Useful to arrange a specific starting state.
    pub fn insert(&self, record: StageProgress) {
        self.records
            .write()
            .unwrap()
            .insert((record.user_id, record.stage_id), record);
    }

    /// Synchronous snapshot of one record.
    #[must_use]
    pub fn snapshot(&self, user_id: UserId, stage_id: StageId) -> Option<StageProgress> {
        self.records.read().unwrap().get(&(user_id, stage_id)).cloned()
    }

    /// Total number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().unwrap().len()
    }

    /// Check if the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().unwrap().is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Database("store unavailable".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for InMemoryProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryProgressStore")
            .field("records", &self.len())
            .finish_non_exhaustive()
    }
}

impl ProgressStore for InMemoryProgressStore {
    fn get(&self, user_id: UserId, stage_id: StageId) -> StoreFuture<'_, StageProgress> {
        Box::pin(async move {
            self.check_available()?;
            self.snapshot(user_id, stage_id)
                .ok_or(StoreError::NotFound { user_id, stage_id })
        })
    }

    fn compare_and_transition(
        &self,
        user_id: UserId,
        stage_id: StageId,
        transition: Transition,
    ) -> StoreFuture<'_, StageProgress> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let mut records = self.records.write().unwrap();
            let record = records
                .get_mut(&(user_id, stage_id))
                .ok_or(StoreError::NotFound { user_id, stage_id })?;

            transition.check(record)?;
            transition.apply_to(record, now);
            Ok(record.clone())
        })
    }

    fn provision<'a>(
        &'a self,
        user_id: UserId,
        catalog: &'a StageCatalog,
    ) -> StoreFuture<'a, usize> {
        Box::pin(async move {
            self.check_available()?;
            let now = self.clock.now();
            let first = catalog.first().id;
            let mut records = self.records.write().unwrap();
            let mut created = 0;

            for stage in catalog.stages() {
                records.entry((user_id, stage.id)).or_insert_with(|| {
                    created += 1;
                    let status = if stage.id == first {
                        StageStatus::Available
                    } else {
                        StageStatus::Locked
                    };
                    StageProgress::provisioned(user_id, stage.id, status, now)
                });
            }
            Ok(created)
        })
    }

    fn list_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<StageProgress>> {
        Box::pin(async move {
            self.check_available()?;
            let mut records: Vec<StageProgress> = self
                .records
                .read()
                .unwrap()
                .values()
                .filter(|record| record.user_id == user_id)
                .cloned()
                .collect();
            records.sort_by_key(|record| record.stage_id);
            Ok(records)
        })
    }

    fn list_stale(
        &self,
        status: StageStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<StageProgress>> {
        Box::pin(async move {
            self.check_available()?;
            let mut records: Vec<StageProgress> = self
                .records
                .read()
                .unwrap()
                .values()
                .filter(|record| record.status == status && record.updated_at < older_than)
                .cloned()
                .collect();
            records.sort_by_key(|record| (record.updated_at, record.user_id, record.stage_id));
            records.truncate(limit);
            Ok(records)
        })
    }

    fn progress_totals(&self) -> StoreFuture<'_, ProgressTotals> {
        Box::pin(async move {
            self.check_available()?;
            let records = self.records.read().unwrap();
            let mut users = BTreeSet::new();
            let mut active = BTreeSet::new();
            let mut totals = ProgressTotals::default();

            for record in records.values() {
                users.insert(record.user_id);
                if record.attempts > 0 {
                    active.insert(record.user_id);
                }
                if record.status == StageStatus::Completed {
                    *totals.completions_by_stage.entry(record.stage_id).or_insert(0) += 1;
                }
            }
            totals.total_users = users.len() as u64;
            totals.active_users = active.len() as u64;
            Ok(totals)
        })
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move { self.check_available() })
    }
}

/// In-memory append-only audit log.
///
/// Clones share the same entries.
#[derive(Clone)]
pub struct InMemorySimulationLog {
    entries: Arc<RwLock<Vec<SimulationLogEntry>>>,
    clock: Arc<dyn Clock>,
}

impl InMemorySimulationLog {
    /// Create an empty log stamped with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty log stamped with `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            clock,
        }
    }

    /// All entries in append order.
    #[must_use]
    pub fn entries(&self) -> Vec<SimulationLogEntry> {
        self.entries.read().unwrap().clone()
    }

    /// Number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    /// Check if the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().unwrap().is_empty()
    }
}

impl Default for InMemorySimulationLog {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemorySimulationLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySimulationLog")
            .field("entries", &self.len())
            .finish_non_exhaustive()
    }
}

impl SimulationLog for InMemorySimulationLog {
    fn append(&self, entry: NewLogEntry) -> StoreFuture<'_, SimulationLogEntry> {
        Box::pin(async move {
            let mut entries = self.entries.write().unwrap();
            let stored = SimulationLogEntry {
                id: i64::try_from(entries.len()).unwrap() + 1,
                user_id: entry.user_id,
                stage_id: entry.stage_id,
                attempt_number: entry.attempt_number,
                result: entry.result,
                message: entry.message,
                payload: entry.payload,
                timestamp: entry.timestamp,
                recorded_at: self.clock.now(),
            };
            entries.push(stored.clone());
            Ok(stored)
        })
    }

    fn list_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<SimulationLogEntry>> {
        Box::pin(async move {
            let mut entries: Vec<SimulationLogEntry> = self
                .entries
                .read()
                .unwrap()
                .iter()
                .filter(|entry| entry.user_id == user_id)
                .cloned()
                .collect();
            entries.sort_by_key(|entry| (entry.timestamp, entry.id));
            Ok(entries)
        })
    }

    fn log_totals(&self) -> StoreFuture<'_, LogTotals> {
        Box::pin(async move {
            let entries = self.entries.read().unwrap();
            Ok(LogTotals {
                total: entries.len() as u64,
                successes: entries.iter().filter(|e| e.result.is_success()).count() as u64,
            })
        })
    }
}
