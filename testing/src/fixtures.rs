//! Catalog and worker-message fixtures.

use crate::test_time;
use progression_core::{
    SimulationOutcome, SimulationResult, StageCatalog, StageDefinition, StageId, UserId,
};
use serde_json::json;

/// A catalog of `stages` stages named `Stage 1..=n` with three attempts each.
///
/// # Panics
///
/// Panics if `stages` is zero.
#[must_use]
pub fn catalog(stages: u32) -> StageCatalog {
    catalog_with_attempts(stages, 3)
}

/// Like [`catalog`] with a custom attempt budget.
///
/// # Panics
///
/// Panics if `stages` or `max_attempts` is zero.
#[must_use]
#[allow(clippy::expect_used)]
pub fn catalog_with_attempts(stages: u32, max_attempts: u32) -> StageCatalog {
    let definitions = (1..=stages)
        .map(|id| StageDefinition {
            id,
            name: format!("Stage {id}"),
            description: format!("Fixture stage {id}"),
            max_attempts: Some(max_attempts),
        })
        .collect();
    StageCatalog::new(definitions, max_attempts).expect("fixture catalog should be valid")
}

/// A success verdict from the worker.
#[must_use]
pub fn success(user_id: i64, stage_id: u32, attempt_number: u32) -> SimulationResult {
    verdict(user_id, stage_id, attempt_number, SimulationOutcome::Success)
}

/// A failure verdict from the worker.
#[must_use]
pub fn failure(user_id: i64, stage_id: u32, attempt_number: u32) -> SimulationResult {
    verdict(user_id, stage_id, attempt_number, SimulationOutcome::Failure)
}

/// A worker verdict with a small score payload.
#[must_use]
pub fn verdict(
    user_id: i64,
    stage_id: u32,
    attempt_number: u32,
    result: SimulationOutcome,
) -> SimulationResult {
    let passed = result.is_success();
    SimulationResult {
        user_id: UserId(user_id),
        stage_id: StageId(stage_id),
        attempt_number,
        result,
        message: if passed {
            "Simulation completed successfully".to_string()
        } else {
            "Simulation failed - please try again".to_string()
        },
        payload: json!({ "score": if passed { 92 } else { 41 } }),
        timestamp: test_time(),
    }
}

/// JSON bytes of a verdict, as the worker would publish them.
///
/// # Panics
///
/// Panics if serialization fails, which cannot happen for these types.
#[must_use]
#[allow(clippy::expect_used)]
pub fn to_wire(result: &SimulationResult) -> Vec<u8> {
    result.to_bytes().expect("verdict should serialize")
}
