//! Readiness endpoint.
//!
//! Liveness (`GET /health`) comes from `progression-web`; readiness checks the
//! progress store.

use super::state::AppState;
use axum::extract::State;
use progression_web::handlers::{ComponentHealth, ReadinessReport};

/// Readiness check endpoint.
///
/// ```bash
/// curl http://localhost:8080/ready
/// # {"status":"ready","components":[{"component":"database","status":"healthy"}]}
/// ```
pub async fn readiness_check(State(state): State<AppState>) -> ReadinessReport {
    let database = state.service.ping().await;
    ReadinessReport::new(vec![ComponentHealth::from_probe("database", database)])
}
