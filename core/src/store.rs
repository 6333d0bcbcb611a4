//! Durable progress storage.
//!
//! [`ProgressStore`] is the single source of truth for lifecycle state. Its
//! only write primitive after provisioning is
//! [`compare_and_transition`](ProgressStore::compare_and_transition), which
//! must read, check, mutate and persist a record as one atomic step per
//! (user, stage) key.
//!
//! # Implementations
//!
//! - `InMemoryProgressStore` in `progression-testing` - for tests
//! - `PostgresProgressStore` in `progression-postgres` - for production

use crate::progress::{StageProgress, StageStatus, Transition, UserId};
use crate::stage::{StageCatalog, StageId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Boxed future returned by store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors returned by store operations.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// No record exists for the pair
    #[error("No progress for user {user_id} on stage {stage_id}")]
    NotFound {
        /// User looked up
        user_id: UserId,
        /// Stage looked up
        stage_id: StageId,
    },

    /// The guard of a transition did not hold
    #[error(
        "Cannot move user {user_id} stage {stage_id} from {current} (attempt {attempts}) to {target}"
    )]
    InvalidTransition {
        /// User of the record
        user_id: UserId,
        /// Stage of the record
        stage_id: StageId,
        /// Status found in the store
        current: StageStatus,
        /// Attempt counter found in the store
        attempts: u32,
        /// Status the transition wanted
        target: StageStatus,
    },

    /// Storage backend failure
    #[error("Database error: {0}")]
    Database(String),
}

/// Aggregate counters over all progress records.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProgressTotals {
    /// Distinct provisioned users
    pub total_users: u64,
    /// Users with at least one attempt on any stage
    pub active_users: u64,
    /// Number of users who completed each stage
    pub completions_by_stage: BTreeMap<StageId, u64>,
}

/// Trait for progress storage implementations.
///
/// All implementations must be `Send + Sync`: HTTP handlers, the result
/// consumer and the sweeper share one store.
pub trait ProgressStore: Send + Sync {
    /// Fetch one record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the pair has no record.
    fn get(&self, user_id: UserId, stage_id: StageId) -> StoreFuture<'_, StageProgress>;

    /// Atomically check `transition` against the current record and apply it.
    ///
    /// Returns the record as persisted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the pair has no record, or
    /// [`StoreError::InvalidTransition`] if the guard does not hold. In both
    /// cases nothing is written.
    fn compare_and_transition(
        &self,
        user_id: UserId,
        stage_id: StageId,
        transition: Transition,
    ) -> StoreFuture<'_, StageProgress>;

    /// Create one record per catalog stage for `user_id`.
    ///
    /// The first stage starts `available`, the rest `locked`. Existing records
    /// are left untouched. Returns how many records were created.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn provision<'a>(&'a self, user_id: UserId, catalog: &'a StageCatalog)
    -> StoreFuture<'a, usize>;

    /// All records of a user, ordered by stage id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn list_for_user(&self, user_id: UserId) -> StoreFuture<'_, Vec<StageProgress>>;

    /// Records in `status` last written before `older_than`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn list_stale(
        &self,
        status: StageStatus,
        older_than: DateTime<Utc>,
        limit: usize,
    ) -> StoreFuture<'_, Vec<StageProgress>>;

    /// Aggregate counters for system statistics.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] on backend failure.
    fn progress_totals(&self) -> StoreFuture<'_, ProgressTotals>;

    /// Cheap reachability check for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the backend is unreachable.
    fn ping(&self) -> StoreFuture<'_, ()>;
}
