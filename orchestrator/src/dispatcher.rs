//! Simulation dispatcher.
//!
//! Validates a start request, moves the stage to `in_progress` and publishes
//! the work request. The call returns as soon as the request is published;
//! the verdict comes back later through the
//! [`ResultReconciler`](crate::reconciler::ResultReconciler).

use progression_core::{
    MessageChannel, ProgressStore, ProgressionError, SimulationRequest, StageCatalog, StageId,
    StageStatus, StoreError, Transition, UserId,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// An accepted start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Dispatched {
    /// Id generated for this run, also carried by the published request
    pub simulation_id: Uuid,
    /// Attempt number carried by the published request
    pub attempt_number: u32,
}

/// Starts simulations.
#[derive(Clone)]
pub struct SimulationDispatcher {
    catalog: Arc<StageCatalog>,
    store: Arc<dyn ProgressStore>,
    channel: Arc<dyn MessageChannel>,
    request_channel: String,
}

impl SimulationDispatcher {
    /// Create a dispatcher publishing to `request_channel`.
    #[must_use]
    pub fn new(
        catalog: Arc<StageCatalog>,
        store: Arc<dyn ProgressStore>,
        channel: Arc<dyn MessageChannel>,
        request_channel: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            channel,
            request_channel: request_channel.into(),
        }
    }

    /// Start a simulation of `stage_id` for `user_id`.
    ///
    /// Publishes exactly one request when it succeeds and none when it fails.
    ///
    /// # Errors
    ///
    /// - [`ProgressionError::NotFound`] if the stage is unknown or the user was never provisioned
    /// - [`ProgressionError::InvalidState`] if the stage is not startable, its
    ///   attempt budget is spent, or a concurrent writer changed it first
    /// - [`ProgressionError::TransientInfra`] if the store or the channel failed;
    ///   a failed publish is rolled back so the stage can be started again
    pub async fn start(
        &self,
        user_id: UserId,
        stage_id: StageId,
        payload: serde_json::Value,
    ) -> Result<Dispatched, ProgressionError> {
        let stage = self
            .catalog
            .get(stage_id)
            .ok_or(ProgressionError::NotFound { user_id, stage_id })?;

        let current = self.store.get(user_id, stage_id).await?;

        if !current.status.is_startable() {
            return Err(not_available(user_id, stage_id, current.status));
        }
        if current.effective_attempts() >= stage.max_attempts {
            return Err(ProgressionError::InvalidState {
                user_id,
                stage_id,
                status: current.status,
                reason: format!("maximum attempts ({}) reached", stage.max_attempts),
            });
        }

        let previous = current.status;
        let attempt_number = current.attempts + 1;
        let simulation_id = Uuid::new_v4();
        let request = SimulationRequest {
            simulation_id,
            user_id,
            stage_id,
            attempt_number,
            payload,
        };
        let bytes = request
            .to_bytes()
            .map_err(|e| ProgressionError::TransientInfra(format!("Failed to encode request: {e}")))?;

        // Pinning the observed attempt count makes a concurrent start lose here.
        let start = Transition::new(&[previous], StageStatus::InProgress)
            .expecting_attempt(current.attempts)
            .with(|record| record.attempts += 1);

        match self.store.compare_and_transition(user_id, stage_id, start).await {
            Ok(_) => {}
            Err(StoreError::InvalidTransition { current, .. }) => {
                return Err(not_available(user_id, stage_id, current));
            }
            Err(e) => return Err(e.into()),
        }

        if let Err(e) = self.channel.publish(&self.request_channel, &bytes).await {
            error!(
                %user_id,
                %stage_id,
                attempt_number,
                channel = %self.request_channel,
                error = %e,
                "Failed to publish simulation request, rolling back start"
            );
            metrics::counter!("progression.dispatch.publish_failed").increment(1);
            self.roll_back(user_id, stage_id, attempt_number, previous).await;
            return Err(e.into());
        }

        info!(
            %user_id,
            %stage_id,
            attempt_number,
            %simulation_id,
            "Simulation dispatched"
        );
        metrics::counter!("progression.dispatch.started").increment(1);

        Ok(Dispatched {
            simulation_id,
            attempt_number,
        })
    }

    /// Return an unpublished attempt to the status it started from.
    async fn roll_back(
        &self,
        user_id: UserId,
        stage_id: StageId,
        attempt_number: u32,
        previous: StageStatus,
    ) {
        let rollback = Transition::new(&[StageStatus::InProgress], previous)
            .expecting_attempt(attempt_number)
            .with(|record| record.timeouts += 1);

        if let Err(e) = self
            .store
            .compare_and_transition(user_id, stage_id, rollback)
            .await
        {
            // The sweeper recovers the record once its deadline passes.
            warn!(
                %user_id,
                %stage_id,
                attempt_number,
                error = %e,
                "Failed to roll back unpublished start"
            );
        }
    }
}

impl std::fmt::Debug for SimulationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimulationDispatcher")
            .field("request_channel", &self.request_channel)
            .finish_non_exhaustive()
    }
}

fn not_available(user_id: UserId, stage_id: StageId, status: StageStatus) -> ProgressionError {
    ProgressionError::InvalidState {
        user_id,
        stage_id,
        status,
        reason: "stage not available".to_string(),
    }
}
