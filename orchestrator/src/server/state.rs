//! Application state for the HTTP server.

use crate::service::ProgressionService;
use std::sync::Arc;

/// Application state shared across all HTTP handlers.
///
/// Cloned (cheaply via Arc) for each request.
#[derive(Clone, Debug)]
pub struct AppState {
    /// Dispatcher, reconciler and read models
    pub service: Arc<ProgressionService>,
}

impl AppState {
    /// Create a new application state.
    #[must_use]
    pub fn new(service: ProgressionService) -> Self {
        Self {
            service: Arc::new(service),
        }
    }
}
