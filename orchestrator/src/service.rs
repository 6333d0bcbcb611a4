//! The progression service: one object holding every collaborator.
//!
//! HTTP handlers only talk to [`ProgressionService`]; the background consumer
//! talks to the [`ResultReconciler`] it hands out. Nothing is global: tests
//! build a service over in-memory doubles, the binary over Postgres and Redis.

use crate::dispatcher::{Dispatched, SimulationDispatcher};
use crate::reconciler::{ReconcileReport, ResultReconciler};
use crate::stats::{ProgressView, SystemStats, UserStats};
use crate::unlock::UnlockCascade;
use progression_core::{
    MessageChannel, ProgressStore, ProgressionError, SimulationLog, SimulationLogEntry,
    SimulationResult, StageCatalog, StageId, UserId,
};
use std::sync::Arc;

/// Service object wiring catalog, store, audit log and channel together.
#[derive(Clone)]
pub struct ProgressionService {
    catalog: Arc<StageCatalog>,
    store: Arc<dyn ProgressStore>,
    log: Arc<dyn SimulationLog>,
    dispatcher: SimulationDispatcher,
    reconciler: ResultReconciler,
}

impl ProgressionService {
    /// Build the service. Requests are published to `request_channel`.
    #[must_use]
    pub fn new(
        catalog: StageCatalog,
        store: Arc<dyn ProgressStore>,
        log: Arc<dyn SimulationLog>,
        channel: Arc<dyn MessageChannel>,
        request_channel: impl Into<String>,
    ) -> Self {
        let catalog = Arc::new(catalog);
        let dispatcher =
            SimulationDispatcher::new(catalog.clone(), store.clone(), channel, request_channel);
        let unlock = UnlockCascade::new(catalog.clone(), store.clone());
        let reconciler = ResultReconciler::new(store.clone(), log.clone(), unlock);

        Self {
            catalog,
            store,
            log,
            dispatcher,
            reconciler,
        }
    }

    /// The stage catalog.
    #[must_use]
    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    /// The reconciler, for the result consumer.
    #[must_use]
    pub fn reconciler(&self) -> &ResultReconciler {
        &self.reconciler
    }

    /// Create progress records for a new user. Returns how many were created.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::TransientInfra`] on store failure.
    pub async fn provision(&self, user_id: UserId) -> Result<usize, ProgressionError> {
        Ok(self.store.provision(user_id, &self.catalog).await?)
    }

    /// Start a simulation. See [`SimulationDispatcher::start`].
    ///
    /// # Errors
    ///
    /// See [`SimulationDispatcher::start`].
    pub async fn start_simulation(
        &self,
        user_id: UserId,
        stage_id: StageId,
        payload: serde_json::Value,
    ) -> Result<Dispatched, ProgressionError> {
        self.dispatcher.start(user_id, stage_id, payload).await
    }

    /// Apply a verdict delivered over HTTP. See [`ResultReconciler::reconcile`].
    ///
    /// # Errors
    ///
    /// See [`ResultReconciler::reconcile`].
    pub async fn record_result(
        &self,
        result: SimulationResult,
    ) -> Result<ReconcileReport, ProgressionError> {
        self.reconciler.reconcile(result).await
    }

    /// A user's progress joined with stage names.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::NotFound`] if the user was never
    /// provisioned, [`ProgressionError::TransientInfra`] on store failure.
    pub async fn user_progress(&self, user_id: UserId) -> Result<Vec<ProgressView>, ProgressionError> {
        let records = self.provisioned_records(user_id).await?;
        Ok(ProgressView::join(&self.catalog, records))
    }

    /// A user's summary statistics.
    ///
    /// # Errors
    ///
    /// Same as [`ProgressionService::user_progress`].
    pub async fn user_stats(&self, user_id: UserId) -> Result<UserStats, ProgressionError> {
        let records = self.provisioned_records(user_id).await?;
        Ok(UserStats::from_records(user_id, &self.catalog, &records))
    }

    /// A user's audit log, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::TransientInfra`] on log failure.
    pub async fn user_simulations(
        &self,
        user_id: UserId,
    ) -> Result<Vec<SimulationLogEntry>, ProgressionError> {
        Ok(self.log.list_for_user(user_id).await?)
    }

    /// System-wide statistics.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::TransientInfra`] on store or log failure.
    pub async fn system_stats(&self) -> Result<SystemStats, ProgressionError> {
        let progress = self.store.progress_totals().await?;
        let log = self.log.log_totals().await?;
        Ok(SystemStats::new(&self.catalog, &progress, log))
    }

    /// Store reachability, for readiness probes.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressionError::TransientInfra`] if the store is unreachable.
    pub async fn ping(&self) -> Result<(), ProgressionError> {
        Ok(self.store.ping().await?)
    }

    async fn provisioned_records(
        &self,
        user_id: UserId,
    ) -> Result<Vec<progression_core::StageProgress>, ProgressionError> {
        let records = self.store.list_for_user(user_id).await?;
        if records.is_empty() {
            return Err(ProgressionError::NotFound {
                user_id,
                stage_id: self.catalog.first().id,
            });
        }
        Ok(records)
    }
}

impl std::fmt::Debug for ProgressionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressionService")
            .field("stages", &self.catalog.len())
            .field("dispatcher", &self.dispatcher)
            .finish_non_exhaustive()
    }
}
