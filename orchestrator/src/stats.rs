//! Read models served by the HTTP API.
//!
//! Pure projections of progress records, the catalog and audit-log counters.
//! Nothing here writes.

use chrono::{DateTime, Utc};
use progression_core::{
    LogTotals, ProgressTotals, SimulationOutcome, StageCatalog, StageId, StageProgress,
    StageStatus, UserId,
};
use serde::Serialize;

/// One progress record joined with its catalog entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressView {
    /// Stage id
    pub stage_id: StageId,
    /// Stage name
    pub stage_name: String,
    /// Stage description
    pub description: String,
    /// Current status
    pub status: StageStatus,
    /// Accepted starts
    pub attempts: u32,
    /// Attempts expired or rolled back without a verdict
    pub timeouts: u32,
    /// Attempt budget
    pub max_attempts: u32,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Verdict of the last reconciled attempt
    pub last_result: Option<SimulationOutcome>,
    /// Last write
    pub updated_at: DateTime<Utc>,
}

impl ProgressView {
    /// Join records with the catalog, dropping records of unknown stages.
    #[must_use]
    pub fn join(catalog: &StageCatalog, records: Vec<StageProgress>) -> Vec<Self> {
        records
            .into_iter()
            .filter_map(|record| {
                let stage = catalog.get(record.stage_id)?;
                Some(Self {
                    stage_id: record.stage_id,
                    stage_name: stage.name.clone(),
                    description: stage.description.clone(),
                    status: record.status,
                    attempts: record.attempts,
                    timeouts: record.timeouts,
                    max_attempts: stage.max_attempts,
                    completed_at: record.completed_at,
                    last_result: record.last_result,
                    updated_at: record.updated_at,
                })
            })
            .collect()
    }
}

/// Per-user summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UserStats {
    /// User
    pub user_id: UserId,
    /// Stages in the catalog
    pub total_stages: usize,
    /// Stages completed
    pub completed_stages: usize,
    /// Lowest available or in-progress stage; `total_stages + 1` when there is none
    pub current_stage: u32,
    /// Accepted starts over all stages
    pub total_attempts: u32,
    /// `completed_stages / total_stages`
    pub success_rate: f64,
    /// Most recent write to any of the user's records
    pub last_activity: Option<DateTime<Utc>>,
}

impl UserStats {
    /// Summarize a user's records.
    ///
    /// A stage counts as current when it is available or in progress. A failed
    /// stage is not current until the user starts it again.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn from_records(user_id: UserId, catalog: &StageCatalog, records: &[StageProgress]) -> Self {
        let total_stages = catalog.len();
        let completed_stages = records
            .iter()
            .filter(|r| r.status == StageStatus::Completed)
            .count();
        let done = u32::try_from(total_stages).unwrap_or(u32::MAX).saturating_add(1);
        let current_stage = records
            .iter()
            .filter(|r| matches!(r.status, StageStatus::Available | StageStatus::InProgress))
            .map(|r| r.stage_id.get())
            .min()
            .unwrap_or(done);

        Self {
            user_id,
            total_stages,
            completed_stages,
            current_stage,
            total_attempts: records.iter().map(|r| r.attempts).sum(),
            success_rate: if total_stages == 0 {
                0.0
            } else {
                completed_stages as f64 / total_stages as f64
            },
            last_activity: records.iter().map(|r| r.updated_at).max(),
        }
    }
}

/// Completions of one stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageCompletion {
    /// Stage id
    pub stage_id: StageId,
    /// Stage name
    pub stage_name: String,
    /// Users who completed the stage
    pub completions: u64,
}

/// System-wide summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemStats {
    /// Provisioned users
    pub total_users: u64,
    /// Users with at least one attempt
    pub active_users: u64,
    /// Audit log entries
    pub total_simulations: u64,
    /// Fraction of audit log entries that are successes
    pub success_rate: f64,
    /// Completions per catalog stage, in catalog order
    pub stage_completion_stats: Vec<StageCompletion>,
}

impl SystemStats {
    /// Combine store and log counters.
    #[must_use]
    pub fn new(catalog: &StageCatalog, progress: &ProgressTotals, log: LogTotals) -> Self {
        let stage_completion_stats = catalog
            .stages()
            .iter()
            .map(|stage| StageCompletion {
                stage_id: stage.id,
                stage_name: stage.name.clone(),
                completions: progress
                    .completions_by_stage
                    .get(&stage.id)
                    .copied()
                    .unwrap_or(0),
            })
            .collect();

        Self {
            total_users: progress.total_users,
            active_users: progress.active_users,
            total_simulations: log.total,
            success_rate: log.success_rate(),
            stage_completion_stats,
        }
    }
}
