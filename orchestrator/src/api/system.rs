//! System-wide statistics endpoint.

use crate::server::state::AppState;
use crate::stats::SystemStats;
use axum::{Json, extract::State};
use progression_web::AppError;

/// Users, attempts and completions across the whole system.
///
/// ```text
/// GET /api/system/stats
/// ```
///
/// # Errors
///
/// Returns 500 if the store or the audit log is unreachable.
pub async fn system_stats(State(state): State<AppState>) -> Result<Json<SystemStats>, AppError> {
    Ok(Json(state.service.system_stats().await?))
}
