//! HTTP API endpoints.
//!
//! - `simulation`: start an attempt, report a verdict
//! - `stages`: the catalog
//! - `users`: provisioning and per-user read models
//! - `system`: system-wide statistics

pub mod simulation;
pub mod stages;
pub mod system;
pub mod users;

use axum::extract::{Path, rejection::PathRejection};
use progression_core::UserId;
use progression_web::AppError;

/// Unwrap a `:user_id` path segment, mapping rejections to the JSON error shape.
pub(crate) fn path_user_id(path: Result<Path<i64>, PathRejection>) -> Result<UserId, AppError> {
    let Path(id) = path?;
    Ok(UserId(id))
}
