//! HTTP request handlers shared by every service.

pub mod health;

pub use health::{ComponentHealth, HealthStatus, ReadinessReport, health_check};
