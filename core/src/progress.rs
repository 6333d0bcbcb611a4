//! Per-(user, stage) progress records and the lifecycle state machine.
//!
//! Status changes are expressed as [`Transition`] values and applied by a
//! [`ProgressStore`](crate::store::ProgressStore) under its per-key atomicity.
//! A transition names the statuses it is allowed to start from, the target
//! status, an optional pinned attempt number and an optional mutator for the
//! counters and result fields.

use crate::message::SimulationOutcome;
use crate::stage::StageId;
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a user, owned by the external identity service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl UserId {
    /// Wrap a raw user id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle status of a stage for one user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not reachable yet; the predecessor is not completed
    Locked,
    /// Can be started
    Available,
    /// A simulation has been dispatched and no verdict has arrived
    InProgress,
    /// Passed; terminal
    Completed,
    /// Last attempt failed; can be retried while attempts remain
    Failed,
}

impl StageStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Locked,
        Self::Available,
        Self::InProgress,
        Self::Completed,
        Self::Failed,
    ];

    /// Convert status to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::Available => "available",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parse status from database string.
    ///
    /// # Errors
    ///
    /// Returns error if the string doesn't match a known status.
    pub fn parse(s: &str) -> Result<Self, StoreError> {
        match s {
            "locked" => Ok(Self::Locked),
            "available" => Ok(Self::Available),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(StoreError::Database(format!("Invalid stage status: {s}"))),
        }
    }

    /// Whether the lifecycle graph has an edge from `self` to `target`.
    ///
    /// `in_progress -> available` exists only for the stale sweeper and
    /// publish compensation. `completed` has no outgoing edges.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Locked | Self::Failed, Self::Available)
                | (Self::Available | Self::Failed, Self::InProgress)
                | (
                    Self::InProgress,
                    Self::Completed | Self::Failed | Self::Available
                )
        )
    }

    /// Whether a simulation may be started from this status.
    #[must_use]
    pub const fn is_startable(self) -> bool {
        matches!(self, Self::Available | Self::Failed)
    }
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable lifecycle record for one (user, stage) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageProgress {
    /// Owner
    pub user_id: UserId,
    /// Stage this record tracks
    pub stage_id: StageId,
    /// Current lifecycle status
    pub status: StageStatus,
    /// Number of accepted starts
    pub attempts: u32,
    /// Attempts that never produced an outcome
    pub timeouts: u32,
    /// Set iff `status == Completed`
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcome of the last reconciled attempt
    pub last_result: Option<SimulationOutcome>,
    /// Payload of the last reconciled attempt
    pub last_payload: Option<serde_json::Value>,
    /// Last write time
    pub updated_at: DateTime<Utc>,
}

impl StageProgress {
    /// A freshly provisioned record with no attempts.
    #[must_use]
    pub const fn provisioned(
        user_id: UserId,
        stage_id: StageId,
        status: StageStatus,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            user_id,
            stage_id,
            status,
            attempts: 0,
            timeouts: 0,
            completed_at: None,
            last_result: None,
            last_payload: None,
            updated_at: now,
        }
    }

    /// Attempts that count against the stage's budget.
    #[must_use]
    pub const fn effective_attempts(&self) -> u32 {
        self.attempts.saturating_sub(self.timeouts)
    }
}

type Mutator = Box<dyn FnOnce(&mut StageProgress) + Send>;

/// A guarded status change.
///
/// # Example
///
/// ```
/// use progression_core::{StageStatus, Transition};
///
/// let start = Transition::new(&[StageStatus::Available, StageStatus::Failed], StageStatus::InProgress)
///     .with(|record| record.attempts += 1);
/// assert_eq!(start.target(), StageStatus::InProgress);
/// ```
pub struct Transition {
    from: Vec<StageStatus>,
    to: StageStatus,
    expected_attempt: Option<u32>,
    mutator: Option<Mutator>,
}

impl Transition {
    /// Transition to `to` from any status in `from`.
    #[must_use]
    pub fn new(from: &[StageStatus], to: StageStatus) -> Self {
        Self {
            from: from.to_vec(),
            to,
            expected_attempt: None,
            mutator: None,
        }
    }

    /// Also require the record's `attempts` to equal `attempt`.
    #[must_use]
    pub fn expecting_attempt(mut self, attempt: u32) -> Self {
        self.expected_attempt = Some(attempt);
        self
    }

    /// Attach a mutator run after the status is set.
    #[must_use]
    pub fn with<F>(mut self, mutator: F) -> Self
    where
        F: FnOnce(&mut StageProgress) + Send + 'static,
    {
        self.mutator = Some(Box::new(mutator));
        self
    }

    /// Statuses this transition may start from.
    #[must_use]
    pub fn expected(&self) -> &[StageStatus] {
        &self.from
    }

    /// Target status.
    #[must_use]
    pub const fn target(&self) -> StageStatus {
        self.to
    }

    /// Pinned attempt number, if any.
    #[must_use]
    pub const fn expected_attempt(&self) -> Option<u32> {
        self.expected_attempt
    }

    /// Verify the guard against the current record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::InvalidTransition`] if the current status is not
    /// in the expected set, the lifecycle graph has no such edge, or the
    /// pinned attempt number does not match.
    pub fn check(&self, current: &StageProgress) -> Result<(), StoreError> {
        let status_ok =
            self.from.contains(&current.status) && current.status.can_transition_to(self.to);
        let attempt_ok = self
            .expected_attempt
            .is_none_or(|attempt| attempt == current.attempts);

        if status_ok && attempt_ok {
            Ok(())
        } else {
            Err(StoreError::InvalidTransition {
                user_id: current.user_id,
                stage_id: current.stage_id,
                current: current.status,
                attempts: current.attempts,
                target: self.to,
            })
        }
    }

    /// Apply the status change and mutator to `record`.
    ///
    /// The caller must have called [`Transition::check`] under the same lock.
    /// `completed_at` is stamped when entering `completed` and cleared
    /// otherwise.
    pub fn apply_to(self, record: &mut StageProgress, now: DateTime<Utc>) {
        record.status = self.to;
        if let Some(mutator) = self.mutator {
            mutator(record);
        }
        record.completed_at = if record.status == StageStatus::Completed {
            record.completed_at.or(Some(now))
        } else {
            None
        };
        record.updated_at = now;
    }
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transition")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("expected_attempt", &self.expected_attempt)
            .field("has_mutator", &self.mutator.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_735_689_600 + secs, 0).unwrap()
    }

    fn record(status: StageStatus) -> StageProgress {
        StageProgress::provisioned(UserId(7), StageId(2), status, at(0))
    }

    #[test]
    fn status_round_trips_through_database_strings() {
        for status in StageStatus::ALL {
            assert_eq!(StageStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(StageStatus::parse("archived").is_err());
    }

    #[test]
    fn status_serializes_as_snake_case() {
        let json = serde_json::to_string(&StageStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
    }

    #[test]
    fn locked_cannot_jump_to_in_progress_or_completed() {
        assert!(!StageStatus::Locked.can_transition_to(StageStatus::InProgress));
        assert!(!StageStatus::Locked.can_transition_to(StageStatus::Completed));
        assert!(StageStatus::Locked.can_transition_to(StageStatus::Available));
    }

    #[test]
    fn completed_is_terminal() {
        for target in StageStatus::ALL {
            assert!(!StageStatus::Completed.can_transition_to(target));
        }
    }

    #[test]
    fn check_rejects_unexpected_status() {
        let transition = Transition::new(&[StageStatus::Available], StageStatus::InProgress);
        let err = transition.check(&record(StageStatus::Locked)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition {
                current: StageStatus::Locked,
                target: StageStatus::InProgress,
                ..
            }
        ));
    }

    #[test]
    fn check_rejects_edges_missing_from_the_graph() {
        // Listing locked in the expected set does not open a locked -> completed edge.
        let transition = Transition::new(&[StageStatus::Locked], StageStatus::Completed);
        assert!(transition.check(&record(StageStatus::Locked)).is_err());
    }

    #[test]
    fn check_enforces_pinned_attempt() {
        let mut current = record(StageStatus::InProgress);
        current.attempts = 2;

        let stale = Transition::new(&[StageStatus::InProgress], StageStatus::Failed)
            .expecting_attempt(1);
        assert!(stale.check(&current).is_err());

        let fresh = Transition::new(&[StageStatus::InProgress], StageStatus::Failed)
            .expecting_attempt(2);
        assert!(fresh.check(&current).is_ok());
    }

    #[test]
    fn apply_runs_mutator_and_stamps_times() {
        let mut current = record(StageStatus::InProgress);
        current.attempts = 1;

        Transition::new(&[StageStatus::InProgress], StageStatus::Completed)
            .with(|r| r.last_result = Some(SimulationOutcome::Success))
            .apply_to(&mut current, at(30));

        assert_eq!(current.status, StageStatus::Completed);
        assert_eq!(current.completed_at, Some(at(30)));
        assert_eq!(current.updated_at, at(30));
        assert_eq!(current.last_result, Some(SimulationOutcome::Success));
    }

    #[test]
    fn effective_attempts_discount_timeouts() {
        let mut current = record(StageStatus::Available);
        current.attempts = 3;
        current.timeouts = 2;
        assert_eq!(current.effective_attempts(), 1);
    }

    fn any_status() -> impl Strategy<Value = StageStatus> {
        prop::sample::select(StageStatus::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn guarded_transitions_preserve_invariants(
            steps in prop::collection::vec((any_status(), any_status(), any::<bool>()), 1..40)
        ) {
            let mut current = record(StageStatus::Available);
            let mut clock = 0;

            for (from, to, bump) in steps {
                clock += 1;
                let before = current.clone();
                let transition = Transition::new(&[from], to).with(move |r| {
                    if bump && r.status == StageStatus::InProgress {
                        r.attempts += 1;
                    }
                });

                if transition.check(&current).is_ok() {
                    transition.apply_to(&mut current, at(clock));
                    prop_assert!(before.status.can_transition_to(current.status));
                    prop_assert_ne!(before.status, StageStatus::Completed);
                    prop_assert_eq!(current.updated_at, at(clock));
                } else {
                    prop_assert_eq!(&current, &before);
                }

                prop_assert_eq!(
                    current.completed_at.is_some(),
                    current.status == StageStatus::Completed
                );
                prop_assert!(current.attempts >= before.attempts);
                prop_assert_ne!(current.status, StageStatus::Locked);
            }
        }
    }
}
