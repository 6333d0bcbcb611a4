//! Expiry of simulations that never reported back.
//!
//! A published request whose verdict is lost leaves its stage `in_progress`
//! forever. The sweeper periodically returns such records to `available` and
//! counts the lost attempt in `timeouts`, which gives it back to the user's
//! attempt budget.

use progression_core::environment::Clock;
use progression_core::{ProgressStore, ProgressionError, StageStatus, StoreError, Transition};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Periodic expiry of stale `in_progress` records.
#[derive(Clone)]
pub struct StaleSweeper {
    store: Arc<dyn ProgressStore>,
    clock: Arc<dyn Clock>,
    deadline: chrono::Duration,
    interval: Duration,
    batch_size: usize,
}

impl StaleSweeper {
    /// Expire records untouched for longer than `deadline`, checking every `interval`.
    ///
    /// An `interval` shorter than one second is raised to one second.
    #[must_use]
    pub fn new(
        store: Arc<dyn ProgressStore>,
        clock: Arc<dyn Clock>,
        deadline: Duration,
        interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            deadline: chrono::Duration::from_std(deadline).unwrap_or(chrono::Duration::MAX),
            interval: interval.max(MIN_INTERVAL),
            batch_size: 100,
        }
    }

    /// Maximum records expired per sweep (default 100, minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Run one sweep and return how many records were expired.
    ///
    /// Records that change between listing and expiry are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::TransientInfra`] if the stale records
    /// cannot be listed.
    pub async fn sweep_once(&self) -> Result<usize, ProgressionError> {
        let Some(cutoff) = self.clock.now().checked_sub_signed(self.deadline) else {
            return Ok(0);
        };

        let stale = self
            .store
            .list_stale(StageStatus::InProgress, cutoff, self.batch_size)
            .await?;

        let mut expired = 0;
        for record in stale {
            let expire = Transition::new(&[StageStatus::InProgress], StageStatus::Available)
                .expecting_attempt(record.attempts)
                .with(|record| record.timeouts += 1);

            match self
                .store
                .compare_and_transition(record.user_id, record.stage_id, expire)
                .await
            {
                Ok(_) => {
                    warn!(
                        user_id = %record.user_id,
                        stage_id = %record.stage_id,
                        attempt_number = record.attempts,
                        since = %record.updated_at,
                        "Expired simulation that never reported back"
                    );
                    expired += 1;
                }
                Err(StoreError::InvalidTransition { .. }) => {
                    debug!(
                        user_id = %record.user_id,
                        stage_id = %record.stage_id,
                        "Record moved on before expiry"
                    );
                }
                Err(e) => {
                    error!(
                        user_id = %record.user_id,
                        stage_id = %record.stage_id,
                        error = %e,
                        "Failed to expire stale record"
                    );
                }
            }
        }

        if expired > 0 {
            metrics::counter!("progression.sweeper.expired")
                .increment(u64::try_from(expired).unwrap_or(u64::MAX));
        }
        Ok(expired)
    }

    /// Spawn the sweeper as a background task that runs until `shutdown` fires.
    #[must_use]
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval = ?self.interval, deadline = %self.deadline, "Stale sweeper started");
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = self.sweep_once().await {
                            error!(error = %e, "Sweep failed");
                        }
                    }
                }
            }
            info!("Stale sweeper stopped");
        })
    }
}

impl std::fmt::Debug for StaleSweeper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaleSweeper")
            .field("deadline", &self.deadline)
            .field("interval", &self.interval)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use progression_core::{StageId, UserId};
    use progression_testing::mocks::ManualClock;
    use progression_testing::{InMemoryProgressStore, fixtures, test_time};

    fn start(store: &InMemoryProgressStore, clock: &ManualClock, user: i64, stage: u32) {
        let mut record = store.snapshot(UserId(user), StageId(stage)).unwrap();
        record.status = StageStatus::InProgress;
        record.attempts += 1;
        record.updated_at = clock.now();
        store.insert(record);
    }

    #[tokio::test]
    async fn expires_only_records_past_the_deadline() {
        let clock = ManualClock::starting_at(test_time());
        let store = Arc::new(InMemoryProgressStore::with_clock(Arc::new(clock.clone())));
        let catalog = fixtures::catalog(2);
        store.provision(UserId(1), &catalog).await.unwrap();
        store.provision(UserId(2), &catalog).await.unwrap();
        start(&store, &clock, 1, 1);

        clock.advance(chrono::Duration::minutes(20));
        start(&store, &clock, 2, 1);

        let sweeper = StaleSweeper::new(
            store.clone(),
            Arc::new(clock.clone()),
            Duration::from_secs(15 * 60),
            Duration::from_secs(60),
        );
        assert_eq!(sweeper.sweep_once().await.unwrap(), 1);

        let expired = store.snapshot(UserId(1), StageId(1)).unwrap();
        assert_eq!(expired.status, StageStatus::Available);
        assert_eq!(expired.attempts, 1);
        assert_eq!(expired.timeouts, 1);
        assert_eq!(
            store.snapshot(UserId(2), StageId(1)).unwrap().status,
            StageStatus::InProgress
        );

        assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_interval_sweeper_keeps_running() {
        let sweeper = StaleSweeper::new(
            Arc::new(InMemoryProgressStore::new()),
            Arc::new(ManualClock::starting_at(test_time())),
            Duration::from_secs(60),
            Duration::ZERO,
        );
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let handle = sweeper.spawn(shutdown_rx);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!handle.is_finished());

        shutdown_tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn listing_failure_is_reported() {
        let store = Arc::new(InMemoryProgressStore::new());
        store.set_unavailable(true);
        let sweeper = StaleSweeper::new(
            store,
            Arc::new(ManualClock::starting_at(test_time())),
            Duration::from_secs(1),
            Duration::from_secs(1),
        );
        assert!(matches!(
            sweeper.sweep_once().await,
            Err(ProgressionError::TransientInfra(_))
        ));
    }
}
