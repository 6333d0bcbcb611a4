//! Per-user endpoints.
//!
//! - `POST /api/users/:user_id/provision`
//! - `GET /api/users/:user_id/progress`
//! - `GET /api/users/:user_id/stats`
//! - `GET /api/users/:user_id/simulations`

use super::path_user_id;
use crate::server::state::AppState;
use crate::stats::{ProgressView, UserStats};
use axum::{
    Json,
    extract::{Path, State, rejection::PathRejection},
};
use progression_core::{SimulationLogEntry, UserId};
use progression_web::AppError;
use serde::Serialize;

/// Response after provisioning a user.
#[derive(Debug, Serialize)]
pub struct ProvisionResponse {
    /// User
    pub user_id: UserId,
    /// Records created; 0 when the user was already provisioned
    pub created: usize,
}

/// A user's progress across the curriculum.
#[derive(Debug, Serialize)]
pub struct ProgressResponse {
    /// User
    pub user_id: UserId,
    /// One entry per stage, in stage order
    pub progress: Vec<ProgressView>,
}

/// Create the user's progress records. Idempotent.
///
/// # Errors
///
/// 400 for a non-numeric id, 500 on store failure.
pub async fn provision_user(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<ProvisionResponse>, AppError> {
    let user_id = path_user_id(path)?;
    let created = state.service.provision(user_id).await?;
    Ok(Json(ProvisionResponse { user_id, created }))
}

/// The user's progress joined with stage names.
///
/// # Errors
///
/// 404 if the user was never provisioned, 500 on store failure.
pub async fn user_progress(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<ProgressResponse>, AppError> {
    let user_id = path_user_id(path)?;
    let progress = state.service.user_progress(user_id).await?;
    Ok(Json(ProgressResponse { user_id, progress }))
}

/// The user's summary statistics.
///
/// # Errors
///
/// 404 if the user was never provisioned, 500 on store failure.
pub async fn user_stats(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<UserStats>, AppError> {
    let user_id = path_user_id(path)?;
    Ok(Json(state.service.user_stats(user_id).await?))
}

/// The user's audit log, oldest first.
///
/// # Errors
///
/// 500 on audit-log failure.
pub async fn user_simulations(
    State(state): State<AppState>,
    path: Result<Path<i64>, PathRejection>,
) -> Result<Json<Vec<SimulationLogEntry>>, AppError> {
    let user_id = path_user_id(path)?;
    Ok(Json(state.service.user_simulations(user_id).await?))
}
