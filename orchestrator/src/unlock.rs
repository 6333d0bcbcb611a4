//! Unlock cascade: completing stage N makes stage N+1 available.

use progression_core::{
    ProgressStore, ProgressionError, StageCatalog, StageId, StageStatus, StoreError, Transition,
    UserId,
};
use std::sync::Arc;
use tracing::{debug, info};

/// What [`UnlockCascade::unlock`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockOutcome {
    /// The successor moved from `locked` to `available`.
    Unlocked(StageId),
    /// The successor was no longer `locked`; nothing changed.
    AlreadyUnlocked(StageId),
    /// The stage is the last one of the catalog.
    LastStage,
}

impl UnlockOutcome {
    /// The stage unlocked by this call, if any.
    #[must_use]
    pub const fn unlocked(self) -> Option<StageId> {
        match self {
            Self::Unlocked(stage_id) => Some(stage_id),
            Self::AlreadyUnlocked(_) | Self::LastStage => None,
        }
    }
}

/// Performs the guarded `locked → available` transition on a successor.
///
/// Invoking it any number of times for the same predecessor unlocks the
/// successor at most once: the store rejects the transition once the
/// successor has left `locked`.
#[derive(Clone)]
pub struct UnlockCascade {
    catalog: Arc<StageCatalog>,
    store: Arc<dyn ProgressStore>,
}

impl UnlockCascade {
    /// Create a cascade over `catalog` and `store`.
    #[must_use]
    pub fn new(catalog: Arc<StageCatalog>, store: Arc<dyn ProgressStore>) -> Self {
        Self { catalog, store }
    }

    /// Successor of `stage_id` in the catalog, `None` for the last stage.
    #[must_use]
    pub fn successor(&self, stage_id: StageId) -> Option<StageId> {
        self.catalog.next(stage_id)
    }

    /// Unlock the stage after `stage_id` for `user_id`.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::NotFound`] if the successor has no record
    /// and [`ProgressionError::TransientInfra`] on store failure.
    pub async fn unlock(
        &self,
        user_id: UserId,
        stage_id: StageId,
    ) -> Result<UnlockOutcome, ProgressionError> {
        let Some(next_id) = self.successor(stage_id) else {
            debug!(%user_id, %stage_id, "Last stage completed, nothing to unlock");
            return Ok(UnlockOutcome::LastStage);
        };

        let transition = Transition::new(&[StageStatus::Locked], StageStatus::Available);
        match self
            .store
            .compare_and_transition(user_id, next_id, transition)
            .await
        {
            Ok(_) => {
                info!(%user_id, stage_id = %next_id, "Stage unlocked");
                metrics::counter!("progression.unlock.unlocked").increment(1);
                Ok(UnlockOutcome::Unlocked(next_id))
            }
            Err(StoreError::InvalidTransition { current, .. }) => {
                debug!(%user_id, stage_id = %next_id, %current, "Successor already unlocked");
                Ok(UnlockOutcome::AlreadyUnlocked(next_id))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl std::fmt::Debug for UnlockCascade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnlockCascade")
            .field("stages", &self.catalog.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use progression_testing::{InMemoryProgressStore, fixtures, test_clock};

    async fn setup(stages: u32) -> (Arc<InMemoryProgressStore>, UnlockCascade) {
        let catalog = Arc::new(fixtures::catalog(stages));
        let store = Arc::new(InMemoryProgressStore::with_clock(Arc::new(test_clock())));
        store.provision(UserId(1), &catalog).await.unwrap();
        let cascade = UnlockCascade::new(catalog, store.clone());
        (store, cascade)
    }

    #[tokio::test]
    async fn unlocks_successor_once() {
        let (store, cascade) = setup(3).await;

        let first = cascade.unlock(UserId(1), StageId(1)).await.unwrap();
        let second = cascade.unlock(UserId(1), StageId(1)).await.unwrap();

        assert_eq!(first, UnlockOutcome::Unlocked(StageId(2)));
        assert_eq!(second, UnlockOutcome::AlreadyUnlocked(StageId(2)));
        let record = store.snapshot(UserId(1), StageId(2)).unwrap();
        assert_eq!(record.status, StageStatus::Available);
        assert_eq!(store.snapshot(UserId(1), StageId(3)).unwrap().status, StageStatus::Locked);
    }

    #[tokio::test]
    async fn last_stage_is_a_no_op() {
        let (_store, cascade) = setup(2).await;
        assert_eq!(
            cascade.unlock(UserId(1), StageId(2)).await.unwrap(),
            UnlockOutcome::LastStage
        );
    }

    #[tokio::test]
    async fn never_relocks_a_completed_successor() {
        let (store, cascade) = setup(2).await;
        let mut done = store.snapshot(UserId(1), StageId(2)).unwrap();
        done.status = StageStatus::Completed;
        done.completed_at = Some(done.updated_at);
        store.insert(done.clone());

        let outcome = cascade.unlock(UserId(1), StageId(1)).await.unwrap();

        assert_eq!(outcome, UnlockOutcome::AlreadyUnlocked(StageId(2)));
        assert_eq!(store.snapshot(UserId(1), StageId(2)).unwrap(), done);
    }

    #[tokio::test]
    async fn store_outage_is_transient() {
        let (store, cascade) = setup(2).await;
        store.set_unavailable(true);
        let err = cascade.unlock(UserId(1), StageId(1)).await.unwrap_err();
        assert!(matches!(err, ProgressionError::TransientInfra(_)));
    }
}
