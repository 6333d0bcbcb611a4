//! Simulation endpoints.
//!
//! - `POST /api/simulation/start`: start an attempt and publish its request
//! - `POST /api/simulation/response`: apply a verdict delivered over HTTP

use crate::reconciler::ReconcileReport;
use crate::server::state::AppState;
use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
};
use progression_core::{SimulationResult, StageId, UserId};
use progression_web::{AppError, CorrelationId};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Request to start a simulation.
#[derive(Debug, Deserialize)]
pub struct StartSimulationRequest {
    /// User attempting the stage
    pub user_id: UserId,
    /// Stage to attempt
    pub stage_id: StageId,
    /// Simulation input forwarded to the worker (object; absent or null means `{}`)
    #[serde(default)]
    pub simulation_data: Option<Value>,
}

/// Response after a simulation was dispatched.
#[derive(Debug, Serialize)]
pub struct StartSimulationResponse {
    /// Id of this dispatch, for log correlation
    pub simulation_id: Uuid,
    /// User
    pub user_id: UserId,
    /// Stage
    pub stage_id: StageId,
    /// Attempt number the worker will report back
    pub attempt_number: u32,
    /// Always `in_progress`
    pub status: &'static str,
    /// Human-readable summary
    pub message: String,
}

/// Start a simulation.
///
/// # Endpoint
///
/// ```text
/// POST /api/simulation/start
/// Content-Type: application/json
///
/// {"user_id": 7, "stage_id": 1, "simulation_data": {"scenario": "phishing"}}
/// ```
///
/// # Errors
///
/// - 400 `BAD_REQUEST`: malformed body or non-object `simulation_data`
/// - 400 `INVALID_STATE`: stage not startable or attempt budget spent
/// - 404: user never provisioned
/// - 500: store or channel failure (the attempt is rolled back)
pub async fn start_simulation(
    State(state): State<AppState>,
    correlation_id: CorrelationId,
    body: Result<Json<StartSimulationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<StartSimulationResponse>), AppError> {
    let Json(request) = body?;
    let payload = match request.simulation_data {
        None | Some(Value::Null) => Value::Object(Map::new()),
        Some(object @ Value::Object(_)) => object,
        Some(_) => return Err(AppError::bad_request("simulation_data must be a JSON object")),
    };

    let dispatched = state
        .service
        .start_simulation(request.user_id, request.stage_id, payload)
        .await?;

    tracing::info!(
        %correlation_id,
        simulation_id = %dispatched.simulation_id,
        user_id = %request.user_id,
        stage_id = %request.stage_id,
        attempt_number = dispatched.attempt_number,
        "Simulation started via API"
    );

    Ok((
        StatusCode::ACCEPTED,
        Json(StartSimulationResponse {
            simulation_id: dispatched.simulation_id,
            user_id: request.user_id,
            stage_id: request.stage_id,
            attempt_number: dispatched.attempt_number,
            status: "in_progress",
            message: format!(
                "Simulation started for stage {} (attempt {})",
                request.stage_id, dispatched.attempt_number
            ),
        }),
    ))
}

/// Apply a simulation verdict.
///
/// Same path as messages on the result channel; duplicates and stale verdicts
/// answer `200` with outcome `duplicate` or `stale`.
///
/// ```text
/// POST /api/simulation/response
///
/// {"user_id": 7, "stage_id": 1, "attempt_number": 1, "result": "success",
///  "message": "passed", "simulation_data": {}, "timestamp": "2025-01-01T00:00:00Z"}
/// ```
///
/// # Errors
///
/// - 400: malformed verdict
/// - 404: unknown user and stage
/// - 500: store or audit-log failure
pub async fn simulation_response(
    State(state): State<AppState>,
    body: Result<Json<SimulationResult>, JsonRejection>,
) -> Result<Json<ReconcileReport>, AppError> {
    let Json(result) = body?;
    let report = state.service.record_result(result).await?;
    Ok(Json(report))
}
