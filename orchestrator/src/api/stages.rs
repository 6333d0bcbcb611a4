//! Catalog endpoint.

use crate::server::state::AppState;
use axum::{Json, extract::State};
use progression_core::Stage;

/// List the curriculum in order.
///
/// ```text
/// GET /api/stages
/// ```
pub async fn list_stages(State(state): State<AppState>) -> Json<Vec<Stage>> {
    Json(state.service.catalog().stages().to_vec())
}
