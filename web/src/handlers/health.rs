//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{Json, http::StatusCode, response::IntoResponse, response::Response};
use serde::Serialize;

/// Health of one dependency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// The dependency answered.
    Healthy,
    /// The dependency did not answer.
    Unhealthy,
}

/// Result of probing one dependency.
#[derive(Debug, Clone, Serialize)]
pub struct ComponentHealth {
    /// Dependency name, e.g. `"database"`.
    pub component: &'static str,
    /// Probe outcome.
    pub status: HealthStatus,
    /// Failure detail, absent when healthy.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ComponentHealth {
    /// Build a component report from a probe result.
    pub fn from_probe<E: std::fmt::Display>(component: &'static str, probe: Result<(), E>) -> Self {
        match probe {
            Ok(()) => Self {
                component,
                status: HealthStatus::Healthy,
                message: None,
            },
            Err(e) => Self {
                component,
                status: HealthStatus::Unhealthy,
                message: Some(e.to_string()),
            },
        }
    }
}

/// Aggregated readiness report.
///
/// Ready only when every component is healthy; rendered with 503 otherwise.
#[derive(Debug, Clone, Serialize)]
pub struct ReadinessReport {
    /// `"ready"` or `"unavailable"`.
    pub status: &'static str,
    /// Per-dependency results.
    pub components: Vec<ComponentHealth>,
}

impl ReadinessReport {
    /// Aggregate component results.
    #[must_use]
    pub fn new(components: Vec<ComponentHealth>) -> Self {
        let status = if components
            .iter()
            .all(|c| c.status == HealthStatus::Healthy)
        {
            "ready"
        } else {
            "unavailable"
        };
        Self { status, components }
    }

    /// Whether every component is healthy.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.status == "ready"
    }
}

impl IntoResponse for ReadinessReport {
    fn into_response(self) -> Response {
        let status = if self.is_ready() {
            StatusCode::OK
        } else {
            tracing::warn!(components = ?self.components, "Readiness check failed");
            StatusCode::SERVICE_UNAVAILABLE
        };
        (status, Json(self)).into_response()
    }
}

/// Liveness body.
#[derive(Debug, Serialize)]
pub struct Liveness {
    /// Always `"ok"`.
    pub status: &'static str,
}

/// Simple health check endpoint (for basic liveness).
///
/// Does NOT check dependencies.
///
/// ```text
/// GET /health  ->  200 {"status":"ok"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> Json<Liveness> {
    Json(Liveness { status: "ok" })
}
