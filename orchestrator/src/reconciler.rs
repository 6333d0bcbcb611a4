//! Result reconciler.
//!
//! Applies worker verdicts to progress records. Verdicts arrive unordered and
//! possibly more than once, so the terminal transition is guarded on
//! `in_progress` and on the verdict's attempt number: a verdict that does not
//! match the attempt currently running leaves the record untouched.
//!
//! ```text
//! decode ─► get ─► compare_and_transition(in_progress@N ─► completed|failed)
//!                        │
//!                        ├─► append audit entry (always)
//!                        └─► unlock successor (success + completed)
//! ```

use crate::runtime::MessageHandler;
use crate::unlock::UnlockCascade;
use async_trait::async_trait;
use progression_core::{
    ChannelMessage, NewLogEntry, ProgressStore, ProgressionError, SimulationLog,
    SimulationResult, StageId, StageStatus, StoreError, Transition,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// How a verdict was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconcileOutcome {
    /// The running attempt moved to its terminal status.
    Applied,
    /// The verdict's attempt was already reconciled.
    Duplicate,
    /// The verdict belongs to an attempt that is no longer running.
    Stale,
}

impl ReconcileOutcome {
    /// Metric label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Stale => "stale",
        }
    }
}

/// Result of reconciling one verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    /// How the verdict was applied
    pub outcome: ReconcileOutcome,
    /// Status of the record afterwards
    pub status: StageStatus,
    /// Stage unlocked as a consequence, if any
    pub unlocked_stage: Option<StageId>,
}

/// Applies verdicts from the result channel or the HTTP API.
#[derive(Clone)]
pub struct ResultReconciler {
    store: Arc<dyn ProgressStore>,
    log: Arc<dyn SimulationLog>,
    unlock: UnlockCascade,
}

impl ResultReconciler {
    /// Create a reconciler.
    #[must_use]
    pub fn new(
        store: Arc<dyn ProgressStore>,
        log: Arc<dyn SimulationLog>,
        unlock: UnlockCascade,
    ) -> Self {
        Self { store, log, unlock }
    }

    /// Decode and reconcile a raw channel payload.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::Decode`] for malformed payloads, otherwise
    /// whatever [`ResultReconciler::reconcile`] returns.
    pub async fn process(&self, payload: &[u8]) -> Result<ReconcileReport, ProgressionError> {
        let result = SimulationResult::from_bytes(payload)?;
        self.reconcile(result).await
    }

    /// Apply one verdict.
    ///
    /// Every verdict for a known record is appended to the audit log,
    /// duplicates included.
    ///
    /// # Errors
    ///
    /// - [`ProgressionError::NotFound`] if the (user, stage) pair has no record
    /// - [`ProgressionError::TransientInfra`] if the store or the log failed.
    ///   When only the log append or the unlock failed, the terminal
    ///   transition has already been persisted.
    pub async fn reconcile(
        &self,
        result: SimulationResult,
    ) -> Result<ReconcileReport, ProgressionError> {
        let SimulationResult {
            user_id,
            stage_id,
            attempt_number,
            result: verdict,
            message,
            payload,
            timestamp,
        } = result;

        let current = self.store.get(user_id, stage_id).await?;
        debug!(
            %user_id,
            %stage_id,
            attempt_number,
            current = %current.status,
            current_attempt = current.attempts,
            "Reconciling simulation result"
        );

        let target = if verdict.is_success() {
            StageStatus::Completed
        } else {
            StageStatus::Failed
        };

        let recorded_payload = payload.clone();
        let finish = Transition::new(&[StageStatus::InProgress], target)
            .expecting_attempt(attempt_number)
            .with(move |record| {
                record.last_result = Some(verdict);
                record.last_payload = Some(recorded_payload);
            });

        let (outcome, status) = match self
            .store
            .compare_and_transition(user_id, stage_id, finish)
            .await
        {
            Ok(record) => {
                info!(
                    %user_id,
                    %stage_id,
                    attempt_number,
                    result = verdict.as_str(),
                    status = %record.status,
                    "Simulation result applied"
                );
                (ReconcileOutcome::Applied, record.status)
            }
            Err(StoreError::InvalidTransition {
                current: status,
                attempts,
                ..
            }) => {
                let settled = matches!(status, StageStatus::Completed | StageStatus::Failed);
                let outcome = if attempts == attempt_number && settled {
                    ReconcileOutcome::Duplicate
                } else {
                    ReconcileOutcome::Stale
                };
                info!(
                    %user_id,
                    %stage_id,
                    attempt_number,
                    current_attempt = attempts,
                    %status,
                    outcome = outcome.as_str(),
                    "Simulation result left record unchanged"
                );
                (outcome, status)
            }
            Err(StoreError::NotFound { .. }) => {
                return Err(ProgressionError::NotFound { user_id, stage_id });
            }
            Err(e) => return Err(e.into()),
        };
        metrics::counter!("progression.reconcile.results", "outcome" => outcome.as_str())
            .increment(1);

        let mut failure = None;

        let entry = NewLogEntry {
            user_id,
            stage_id,
            attempt_number,
            result: verdict,
            message,
            payload,
            timestamp,
        };
        if let Err(e) = self.log.append(entry).await {
            error!(%user_id, %stage_id, attempt_number, error = %e, "Failed to append simulation log entry");
            failure = Some(ProgressionError::from(e));
        }

        let mut unlocked_stage = None;
        if verdict.is_success() && status == StageStatus::Completed {
            match self.unlock.unlock(user_id, stage_id).await {
                Ok(unlocked) => unlocked_stage = unlocked.unlocked(),
                Err(e) => {
                    error!(%user_id, %stage_id, error = %e, "Failed to unlock next stage");
                    failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = failure {
            return Err(e);
        }

        Ok(ReconcileReport {
            outcome,
            status,
            unlocked_stage,
        })
    }
}

#[async_trait]
impl MessageHandler for ResultReconciler {
    async fn handle(&self, message: &ChannelMessage) -> Result<(), ProgressionError> {
        self.process(&message.payload).await.map(|_| ())
    }
}

impl std::fmt::Debug for ResultReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultReconciler")
            .field("unlock", &self.unlock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use progression_core::{SimulationOutcome, UserId};
    use progression_testing::{
        InMemoryProgressStore, InMemorySimulationLog, fixtures, test_clock,
    };

    struct Harness {
        store: Arc<InMemoryProgressStore>,
        log: Arc<InMemorySimulationLog>,
        reconciler: ResultReconciler,
    }

    async fn harness(stages: u32) -> Harness {
        let catalog = Arc::new(fixtures::catalog(stages));
        let clock = Arc::new(test_clock());
        let store = Arc::new(InMemoryProgressStore::with_clock(clock.clone()));
        let log = Arc::new(InMemorySimulationLog::with_clock(clock));
        store.provision(UserId(1), &catalog).await.unwrap();
        let unlock = UnlockCascade::new(catalog, store.clone());
        let reconciler = ResultReconciler::new(store.clone(), log.clone(), unlock);
        Harness {
            store,
            log,
            reconciler,
        }
    }

    fn running(store: &InMemoryProgressStore, stage: u32, attempt: u32) {
        let mut record = store.snapshot(UserId(1), StageId(stage)).unwrap();
        record.status = StageStatus::InProgress;
        record.attempts = attempt;
        store.insert(record);
    }

    #[tokio::test]
    async fn success_completes_and_unlocks() {
        let h = harness(3).await;
        running(&h.store, 1, 1);

        let report = h.reconciler.reconcile(fixtures::success(1, 1, 1)).await.unwrap();

        assert_eq!(report.outcome, ReconcileOutcome::Applied);
        assert_eq!(report.status, StageStatus::Completed);
        assert_eq!(report.unlocked_stage, Some(StageId(2)));

        let record = h.store.snapshot(UserId(1), StageId(1)).unwrap();
        assert!(record.completed_at.is_some());
        assert_eq!(record.last_result, Some(SimulationOutcome::Success));
        assert_eq!(
            h.store.snapshot(UserId(1), StageId(2)).unwrap().status,
            StageStatus::Available
        );
        assert_eq!(h.log.len(), 1);
    }

    #[tokio::test]
    async fn failure_marks_failed_without_unlocking() {
        let h = harness(3).await;
        running(&h.store, 1, 1);

        let report = h.reconciler.reconcile(fixtures::failure(1, 1, 1)).await.unwrap();

        assert_eq!(report.status, StageStatus::Failed);
        assert_eq!(report.unlocked_stage, None);
        let record = h.store.snapshot(UserId(1), StageId(1)).unwrap();
        assert!(record.completed_at.is_none());
        assert_eq!(
            h.store.snapshot(UserId(1), StageId(2)).unwrap().status,
            StageStatus::Locked
        );
    }

    #[tokio::test]
    async fn duplicate_is_logged_but_not_reapplied() {
        let h = harness(3).await;
        running(&h.store, 1, 1);

        h.reconciler.reconcile(fixtures::success(1, 1, 1)).await.unwrap();
        let after_first = h.store.snapshot(UserId(1), StageId(1)).unwrap();
        let report = h.reconciler.reconcile(fixtures::success(1, 1, 1)).await.unwrap();

        assert_eq!(report.outcome, ReconcileOutcome::Duplicate);
        assert_eq!(report.unlocked_stage, None);
        assert_eq!(h.store.snapshot(UserId(1), StageId(1)).unwrap(), after_first);
        assert_eq!(h.log.len(), 2);
    }

    #[tokio::test]
    async fn older_attempt_is_stale() {
        let h = harness(3).await;
        running(&h.store, 1, 2);

        let report = h.reconciler.reconcile(fixtures::success(1, 1, 1)).await.unwrap();

        assert_eq!(report.outcome, ReconcileOutcome::Stale);
        assert_eq!(report.status, StageStatus::InProgress);
        assert_eq!(
            h.store.snapshot(UserId(1), StageId(2)).unwrap().status,
            StageStatus::Locked
        );
        assert_eq!(h.log.len(), 1);
    }

    #[tokio::test]
    async fn verdict_for_an_expired_attempt_is_stale() {
        let h = harness(2).await;
        let mut record = h.store.snapshot(UserId(1), StageId(1)).unwrap();
        record.status = StageStatus::Available;
        record.attempts = 1;
        record.timeouts = 1;
        h.store.insert(record);

        let report = h.reconciler.reconcile(fixtures::success(1, 1, 1)).await.unwrap();

        assert_eq!(report.outcome, ReconcileOutcome::Stale);
        assert_eq!(report.status, StageStatus::Available);
        assert_eq!(report.unlocked_stage, None);
        assert_eq!(h.log.len(), 1);
    }

    #[tokio::test]
    async fn unknown_pair_is_not_found_and_not_logged() {
        let h = harness(3).await;

        let err = h.reconciler.reconcile(fixtures::success(7, 1, 1)).await.unwrap_err();

        assert!(matches!(err, ProgressionError::NotFound { .. }));
        assert!(h.log.is_empty());
    }

    #[tokio::test]
    async fn malformed_payload_is_a_decode_error() {
        let h = harness(3).await;
        let err = h.reconciler.process(b"{\"user_id\":").await.unwrap_err();
        assert!(matches!(err, ProgressionError::Decode(_)));
    }

    #[tokio::test]
    async fn final_stage_completes_without_unlock() {
        let h = harness(2).await;
        running(&h.store, 2, 1);

        let report = h.reconciler.reconcile(fixtures::success(1, 2, 1)).await.unwrap();

        assert_eq!(report.status, StageStatus::Completed);
        assert_eq!(report.unlocked_stage, None);
    }
}
