//! Training-progression orchestrator.
//!
//! Users move through an ordered curriculum of stages. Each attempt at a stage
//! is dispatched as a simulation request to an external worker; the worker's
//! verdict comes back on a result channel, completes or fails the stage, and
//! on success unlocks the next one.
//!
//! # Architecture
//!
//! ```text
//! HTTP ─► ProgressionService ─► SimulationDispatcher ─► request channel ─► worker
//!                                                                            │
//!          ResultConsumer ◄─────────────── result channel ◄──────────────────┘
//!                │
//!                └─► ResultReconciler ─► ProgressStore + SimulationLog
//!                                   └─► UnlockCascade
//! ```
//!
//! Every write to a progress record is a compare-and-transition on the store,
//! so concurrent starts, duplicate verdicts and the [`sweeper`] never race
//! each other into an inconsistent record.

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
pub mod dispatcher;
pub mod reconciler;
pub mod runtime;
pub mod server;
pub mod service;
pub mod stats;
pub mod sweeper;
pub mod unlock;

pub use config::{Config, ConfigError};
pub use dispatcher::{Dispatched, SimulationDispatcher};
pub use reconciler::{ReconcileOutcome, ReconcileReport, ResultReconciler};
pub use runtime::{Application, MessageHandler, ResultConsumer};
pub use server::{AppState, build_router};
pub use service::ProgressionService;
pub use sweeper::StaleSweeper;
pub use unlock::{UnlockCascade, UnlockOutcome};
