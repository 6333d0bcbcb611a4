//! Stage definitions and the ordered curriculum catalog.
//!
//! The catalog is loaded once at startup and is immutable afterwards. Every
//! structural problem (empty catalog, gaps in the ordinal sequence, zero
//! attempt budget) is reported as a [`CatalogError`] so that the process fails
//! before serving a single request.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use thiserror::Error;

/// Default attempt budget used when a stage definition does not set one.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Ordinal identifier of a stage (1-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StageId(pub u32);

impl StageId {
    /// Create a stage id from its ordinal.
    #[must_use]
    pub const fn new(ordinal: u32) -> Self {
        Self(ordinal)
    }

    /// The raw ordinal.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One step of the curriculum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    /// Ordinal position, starting at 1
    pub id: StageId,
    /// Display name
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// Number of attempts a user gets before the stage is exhausted
    pub max_attempts: u32,
}

/// Stage as written in a catalog file.
///
/// `max_attempts` is optional and falls back to the catalog-wide default.
#[derive(Debug, Clone, Deserialize)]
pub struct StageDefinition {
    /// Ordinal position, starting at 1
    pub id: u32,
    /// Display name
    pub name: String,
    /// Human-readable description
    #[serde(default)]
    pub description: String,
    /// Optional per-stage attempt budget
    #[serde(default)]
    pub max_attempts: Option<u32>,
}

/// Errors raised while loading the catalog.
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The catalog has no stages
    #[error("Stage catalog is empty")]
    Empty,

    /// Ordinals must run 1..=n without gaps or duplicates
    #[error("Stage ids must be contiguous from 1: expected {expected}, found {found}")]
    NonContiguous {
        /// The ordinal expected at this position
        expected: u32,
        /// The ordinal actually found
        found: u32,
    },

    /// A stage allows no attempts at all
    #[error("Stage {0} has max_attempts = 0")]
    ZeroAttempts(u32),

    /// The catalog file could not be read
    #[error("Failed to read stage catalog: {0}")]
    Io(#[from] std::io::Error),

    /// The catalog file is not valid JSON
    #[error("Failed to parse stage catalog: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Ordered, immutable stage catalog.
///
/// # Example
///
/// ```
/// use progression_core::stage::{StageCatalog, StageId};
///
/// let catalog = StageCatalog::default_curriculum();
/// assert_eq!(catalog.len(), 11);
/// assert_eq!(catalog.next(StageId::new(1)), Some(StageId::new(2)));
/// assert_eq!(catalog.next(StageId::new(11)), None);
/// ```
#[derive(Debug, Clone)]
pub struct StageCatalog {
    stages: Vec<Stage>,
}

impl StageCatalog {
    /// Build a catalog from stage definitions.
    ///
    /// Definitions may arrive in any order; they are sorted by id and then
    /// validated.
    ///
    /// # Errors
    ///
    /// Returns a [`CatalogError`] if the catalog is empty, has gaps or
    /// duplicates, or a stage has a zero attempt budget.
    pub fn new(
        definitions: Vec<StageDefinition>,
        default_max_attempts: u32,
    ) -> Result<Self, CatalogError> {
        if definitions.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut stages: Vec<Stage> = definitions
            .into_iter()
            .map(|def| Stage {
                id: StageId(def.id),
                name: def.name,
                description: def.description,
                max_attempts: def.max_attempts.unwrap_or(default_max_attempts),
            })
            .collect();
        stages.sort_by_key(|stage| stage.id);

        for (expected, stage) in (1u32..).zip(&stages) {
            if stage.id.0 != expected {
                return Err(CatalogError::NonContiguous {
                    expected,
                    found: stage.id.0,
                });
            }
            if stage.max_attempts == 0 {
                return Err(CatalogError::ZeroAttempts(stage.id.0));
            }
        }

        Ok(Self { stages })
    }

    /// Parse a JSON array of stage definitions.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Parse`] on malformed JSON, or any validation
    /// error from [`StageCatalog::new`].
    pub fn from_json_str(json: &str, default_max_attempts: u32) -> Result<Self, CatalogError> {
        let definitions: Vec<StageDefinition> = serde_json::from_str(json)?;
        Self::new(definitions, default_max_attempts)
    }

    /// Load a JSON catalog file.
    ///
    /// # Errors
    ///
    /// Returns [`CatalogError::Io`] if the file cannot be read, or any error
    /// from [`StageCatalog::from_json_str`].
    pub fn from_path(path: impl AsRef<Path>, default_max_attempts: u32) -> Result<Self, CatalogError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json, default_max_attempts)
    }

    /// The built-in eleven-stage astronaut training curriculum.
    #[must_use]
    pub fn default_curriculum() -> Self {
        Self::curriculum_with_attempts(DEFAULT_MAX_ATTEMPTS)
    }

    /// The built-in curriculum with a custom attempt budget.
    #[must_use]
    pub fn curriculum_with_attempts(max_attempts: u32) -> Self {
        let max_attempts = max_attempts.max(1);
        let stages = (1u32..)
            .zip(DEFAULT_STAGES)
            .map(|(id, (name, description))| Stage {
                id: StageId(id),
                name: (*name).to_string(),
                description: (*description).to_string(),
                max_attempts,
            })
            .collect();
        Self { stages }
    }

    /// All stages in order.
    #[must_use]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Look up a stage by id.
    #[must_use]
    pub fn get(&self, id: StageId) -> Option<&Stage> {
        let index = usize::try_from(id.0).ok()?.checked_sub(1)?;
        self.stages.get(index)
    }

    /// The first stage of the curriculum.
    #[must_use]
    pub fn first(&self) -> &Stage {
        // Construction guarantees at least one stage.
        &self.stages[0]
    }

    /// The stage following `id`, or `None` past the last stage.
    #[must_use]
    pub fn next(&self, id: StageId) -> Option<StageId> {
        let next = StageId(id.0.checked_add(1)?);
        self.get(next).map(|stage| stage.id)
    }

    /// Number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always `false`; an empty catalog cannot be constructed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

const DEFAULT_STAGES: &[(&str, &str)] = &[
    (
        "Physical Fitness Assessment",
        "Test cardiovascular endurance and strength.",
    ),
    (
        "Mental Health Screening",
        "Psychological evaluation for stress resilience.",
    ),
    (
        "Technical Knowledge Test",
        "Exam on spacecraft systems and orbital mechanics.",
    ),
    (
        "Emergency Procedures Training",
        "Simulation of crisis scenarios.",
    ),
    (
        "Space Suit Operations",
        "EVA suit pressure management and mobility.",
    ),
    (
        "Zero Gravity Simulation",
        "Adaptation to weightlessness in parabolic flight.",
    ),
    (
        "Mission Planning",
        "Calculating orbital trajectories and fuel usage.",
    ),
    (
        "Communication Protocols",
        "Radio discipline and ground control comms.",
    ),
    (
        "Equipment Familiarization",
        "Hands-on training with onboard tools.",
    ),
    (
        "Mission Simulation",
        "Full dress rehearsal of the mission profile.",
    ),
    (
        "Final Certification",
        "Final review and Go/No-Go decision.",
    ),
];

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn def(id: u32) -> StageDefinition {
        StageDefinition {
            id,
            name: format!("Stage {id}"),
            description: String::new(),
            max_attempts: None,
        }
    }

    #[test]
    fn default_curriculum_has_eleven_ordered_stages() {
        let catalog = StageCatalog::default_curriculum();
        assert_eq!(catalog.len(), 11);
        assert_eq!(catalog.first().id, StageId(1));
        assert_eq!(catalog.first().name, "Physical Fitness Assessment");
        assert!(catalog.stages().windows(2).all(|w| w[0].id < w[1].id));
        assert!(catalog.stages().iter().all(|s| s.max_attempts == 3));
    }

    #[test]
    fn next_stops_at_last_stage() {
        let catalog = StageCatalog::default_curriculum();
        assert_eq!(catalog.next(StageId(10)), Some(StageId(11)));
        assert_eq!(catalog.next(StageId(11)), None);
        assert_eq!(catalog.next(StageId(99)), None);
        assert_eq!(catalog.next(StageId(u32::MAX)), None);
    }

    #[test]
    fn get_rejects_zero_and_out_of_range() {
        let catalog = StageCatalog::default_curriculum();
        assert!(catalog.get(StageId(0)).is_none());
        assert!(catalog.get(StageId(12)).is_none());
        assert_eq!(catalog.get(StageId(3)).unwrap().name, "Technical Knowledge Test");
    }

    #[test]
    fn empty_catalog_is_rejected() {
        assert!(matches!(StageCatalog::new(vec![], 3), Err(CatalogError::Empty)));
    }

    #[test]
    fn definitions_are_sorted_before_validation() {
        let catalog = StageCatalog::new(vec![def(2), def(1), def(3)], 5).unwrap();
        let ids: Vec<u32> = catalog.stages().iter().map(|s| s.id.0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(catalog.first().max_attempts, 5);
    }

    #[test]
    fn gaps_and_duplicates_are_rejected() {
        assert!(matches!(
            StageCatalog::new(vec![def(1), def(3)], 3),
            Err(CatalogError::NonContiguous { expected: 2, found: 3 })
        ));
        assert!(matches!(
            StageCatalog::new(vec![def(1), def(1)], 3),
            Err(CatalogError::NonContiguous { expected: 2, found: 1 })
        ));
        assert!(matches!(
            StageCatalog::new(vec![def(2)], 3),
            Err(CatalogError::NonContiguous { expected: 1, found: 2 })
        ));
    }

    #[test]
    fn zero_attempt_budget_is_rejected() {
        let mut stage = def(1);
        stage.max_attempts = Some(0);
        assert!(matches!(
            StageCatalog::new(vec![stage], 3),
            Err(CatalogError::ZeroAttempts(1))
        ));
    }

    #[test]
    fn parses_json_catalog() {
        let json = r#"[
            {"id": 1, "name": "Fitness", "description": "Run", "max_attempts": 2},
            {"id": 2, "name": "Exam"}
        ]"#;
        let catalog = StageCatalog::from_json_str(json, 4).unwrap();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.get(StageId(1)).unwrap().max_attempts, 2);
        assert_eq!(catalog.get(StageId(2)).unwrap().max_attempts, 4);
        assert_eq!(catalog.get(StageId(2)).unwrap().description, "");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(matches!(
            StageCatalog::from_json_str("{not json", 3),
            Err(CatalogError::Parse(_))
        ));
    }
}
