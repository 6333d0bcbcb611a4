//! Router configuration.

use super::health::readiness_check;
use super::state::AppState;
use crate::api::{simulation, stages, system, users};
use axum::{
    Router,
    routing::{get, post},
};
use progression_web::{correlation_id_layer, handlers::health_check};
use tower_http::trace::TraceLayer;

/// Build the complete Axum router.
///
/// ```text
/// GET  /health
/// GET  /ready
/// POST /api/simulation/start
/// POST /api/simulation/response
/// GET  /api/stages
/// POST /api/users/:user_id/provision
/// GET  /api/users/:user_id/progress
/// GET  /api/users/:user_id/stats
/// GET  /api/users/:user_id/simulations
/// GET  /api/system/stats
/// ```
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/simulation/start", post(simulation::start_simulation))
        .route("/simulation/response", post(simulation::simulation_response))
        .route("/stages", get(stages::list_stages))
        .route("/users/:user_id/provision", post(users::provision_user))
        .route("/users/:user_id/progress", get(users::user_progress))
        .route("/users/:user_id/stats", get(users::user_stats))
        .route("/users/:user_id/simulations", get(users::user_simulations))
        .route("/system/stats", get(system::system_stats));

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(correlation_id_layer())
        .with_state(state)
}
