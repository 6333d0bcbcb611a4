//! Error taxonomy of orchestrator operations.
//!
//! | Variant          | HTTP | Channel path            |
//! |------------------|------|-------------------------|
//! | `NotFound`       | 404  | dropped with a warning  |
//! | `InvalidState`   | 400  | recorded as stale       |
//! | `Decode`         | 400  | dropped and logged      |
//! | `TransientInfra` | 500  | logged, message dropped |

use crate::channel::ChannelError;
use crate::message::DecodeError;
use crate::progress::{StageStatus, UserId};
use crate::stage::StageId;
use crate::store::StoreError;
use thiserror::Error;

/// Errors surfaced by dispatcher, reconciler and read models.
#[derive(Error, Debug, Clone)]
pub enum ProgressionError {
    /// Unknown (user, stage) pair
    #[error("No progress for user {user_id} on stage {stage_id}")]
    NotFound {
        /// User looked up
        user_id: UserId,
        /// Stage looked up
        stage_id: StageId,
    },

    /// Operation not permitted from the current status
    #[error("Stage {stage_id} for user {user_id} is {status}: {reason}")]
    InvalidState {
        /// User of the record
        user_id: UserId,
        /// Stage of the record
        stage_id: StageId,
        /// Status that blocked the operation
        status: StageStatus,
        /// Human-readable reason
        reason: String,
    },

    /// Malformed message or request body
    #[error("{0}")]
    Decode(String),

    /// Store or channel failure
    #[error("Infrastructure failure: {0}")]
    TransientInfra(String),
}

impl From<StoreError> for ProgressionError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::NotFound { user_id, stage_id } => Self::NotFound { user_id, stage_id },
            StoreError::InvalidTransition {
                user_id,
                stage_id,
                current,
                target,
                ..
            } => Self::InvalidState {
                user_id,
                stage_id,
                status: current,
                reason: format!("cannot move to {target}"),
            },
            StoreError::Database(message) => Self::TransientInfra(message),
        }
    }
}

impl From<ChannelError> for ProgressionError {
    fn from(error: ChannelError) -> Self {
        Self::TransientInfra(error.to_string())
    }
}

impl From<DecodeError> for ProgressionError {
    fn from(error: DecodeError) -> Self {
        Self::Decode(error.to_string())
    }
}
