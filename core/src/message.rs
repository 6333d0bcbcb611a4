//! Wire messages exchanged with the simulation worker.
//!
//! Both directions are JSON. The worker names the free-form payload
//! `simulation_data`; an absent or `null` payload decodes to an empty object,
//! any other non-object value is rejected.

use crate::progress::UserId;
use crate::stage::StageId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

/// Default name of the channel carrying start requests to the worker.
pub const REQUEST_CHANNEL: &str = "simulation_requests";

/// Default name of the channel carrying verdicts back from the worker.
pub const RESULT_CHANNEL: &str = "simulation_responses";

/// Verdict of one simulation run.
///
/// Anything other than `"success"` is treated as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SimulationOutcome {
    /// The user passed the stage
    Success,
    /// The user did not pass the stage
    #[serde(other)]
    Failure,
}

impl SimulationOutcome {
    /// Database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
        }
    }

    /// Parse from the database string; unknown values map to failure.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        if s == "success" { Self::Success } else { Self::Failure }
    }

    /// `true` for [`SimulationOutcome::Success`].
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

/// Work request published to the request channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRequest {
    /// Id of this run, returned to the caller of the start endpoint
    #[serde(default)]
    pub simulation_id: Uuid,
    /// User attempting the stage
    pub user_id: UserId,
    /// Stage being attempted
    pub stage_id: StageId,
    /// Attempt number assigned by the dispatcher
    pub attempt_number: u32,
    /// Free-form simulation input
    #[serde(rename = "simulation_data", default = "empty_object", deserialize_with = "object_or_null")]
    pub payload: Value,
}

/// Verdict published by the worker to the result channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationResult {
    /// User who attempted the stage
    pub user_id: UserId,
    /// Stage that was attempted
    pub stage_id: StageId,
    /// Attempt number the verdict belongs to
    pub attempt_number: u32,
    /// Pass or fail
    pub result: SimulationOutcome,
    /// Worker's human-readable summary
    #[serde(default)]
    pub message: String,
    /// Free-form simulation output
    #[serde(rename = "simulation_data", default = "empty_object", deserialize_with = "object_or_null")]
    pub payload: Value,
    /// Time the worker produced the verdict
    pub timestamp: DateTime<Utc>,
}

/// A channel message could not be decoded.
#[derive(Error, Debug, Clone)]
#[error("Malformed {kind}: {reason}")]
pub struct DecodeError {
    /// Which message type was being decoded
    pub kind: &'static str,
    /// Decoder error text
    pub reason: String,
}

impl SimulationRequest {
    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError {
            kind: "simulation request",
            reason: e.to_string(),
        })
    }
}

impl SimulationResult {
    /// Encode as JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`serde_json::Error`] if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Decode from JSON bytes.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] on malformed input.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        serde_json::from_slice(bytes).map_err(|e| DecodeError {
            kind: "simulation result",
            reason: e.to_string(),
        })
    }
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

fn object_or_null<'de, D>(deserializer: D) -> Result<Value, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(empty_object()),
        value @ Value::Object(_) => Ok(value),
        other => Err(serde::de::Error::custom(format!(
            "simulation_data must be an object, got {other}"
        ))),
    }
}
