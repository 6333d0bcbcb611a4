//! # Progression Core
//!
//! Core types and collaborator traits for the training-progression orchestrator.
//!
//! A user advances through an ordered curriculum of stages. Starting a stage
//! dispatches a simulation to an external worker pool; the worker's verdict
//! arrives later on a result channel and is reconciled back into durable
//! per-user progress.
//!
//! ## Core Concepts
//!
//! - **Stage**: one step of the curriculum, defined by the [`StageCatalog`]
//! - **Progress**: the per-(user, stage) lifecycle record ([`StageProgress`])
//! - **Transition**: a guarded status change applied atomically by a [`ProgressStore`]
//! - **Channel**: publish/subscribe transport to the worker ([`MessageChannel`])
//! - **Audit log**: append-only record of every processed result ([`SimulationLog`])
//!
//! ## Lifecycle
//!
//! ```text
//! locked ──► available ──► in_progress ──► completed
//!                ▲  ▲           │
//!                │  └───────────┤ (sweeper / publish compensation)
//!                │              ▼
//!                └────────── failed ──► in_progress (retry)
//! ```
//!
//! ## Writers
//!
//! HTTP handlers and the result consumer mutate the same records concurrently.
//! Every write goes through [`ProgressStore::compare_and_transition`], which
//! makes concurrent start/complete/unlock operations serializable per
//! (user, stage) key without any in-process lock.

pub mod audit;
pub mod channel;
pub mod error;
pub mod message;
pub mod progress;
pub mod stage;
pub mod store;

// Re-export commonly used types
pub use audit::{LogTotals, NewLogEntry, SimulationLog, SimulationLogEntry};
pub use channel::{ChannelError, ChannelMessage, MessageChannel, MessageStream};
pub use chrono::{DateTime, Utc};
pub use error::ProgressionError;
pub use message::{
    DecodeError, REQUEST_CHANNEL, RESULT_CHANNEL, SimulationOutcome, SimulationRequest,
    SimulationResult,
};
pub use progress::{StageProgress, StageStatus, Transition, UserId};
pub use stage::{CatalogError, Stage, StageCatalog, StageDefinition, StageId};
pub use store::{ProgressStore, ProgressTotals, StoreError, StoreFuture};

/// Environment module - Dependency injection traits
///
/// All time reads in the orchestrator go through [`Clock`] so that tests can
/// pin or advance time deterministically.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use progression_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
