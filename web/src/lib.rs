//! Axum integration shared by the progression services.
//!
//! The orchestrator's HTTP surface is thin: handlers parse the request, call
//! the progression service and map its result to a response. This crate holds
//! the pieces every such handler needs:
//!
//! - [`AppError`]: one JSON error shape, with conversions from
//!   [`ProgressionError`](progression_core::ProgressionError) and axum rejections
//! - [`correlation_id_layer`]: per-request correlation ids and tracing spans
//! - [`handlers::health`]: liveness and readiness responses
//!
//! # Example
//!
//! ```ignore
//! use progression_web::{AppError, correlation_id_layer, handlers::health_check};
//! use axum::{Router, routing::get};
//!
//! let app = Router::new()
//!     .route("/health", get(health_check))
//!     .route("/api/users/:user_id/progress", get(user_progress))
//!     .layer(correlation_id_layer())
//!     .with_state(app_state);
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

pub use error::AppError;
pub use extractors::CorrelationId;
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
