//! # Progression Testing
//!
//! Testing utilities for the training-progression orchestrator.
//!
//! This crate provides:
//! - In-memory implementations of the store, audit log and channel traits
//! - Fixed and manually advanced clocks
//! - Fixtures for catalogs and worker messages
//!
//! ## Example
//!
//! ```
//! use progression_testing::{InMemoryProgressStore, fixtures, test_clock};
//! use progression_core::{ProgressStore, StageId, StageStatus, UserId};
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryProgressStore::with_clock(Arc::new(test_clock()));
//! let catalog = fixtures::catalog(3);
//!
//! assert_eq!(store.provision(UserId(1), &catalog).await.unwrap(), 3);
//! let first = store.get(UserId(1), StageId(1)).await.unwrap();
//! assert_eq!(first.status, StageStatus::Available);
//! # });
//! ```

use chrono::{DateTime, Utc};
use progression_core::environment::Clock;

pub mod channel_mocks;
pub mod fixtures;
pub mod store_mocks;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use std::sync::{Arc, Mutex};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use progression_testing::mocks::FixedClock;
    /// use progression_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can hand one clone to the code
    /// under test and advance another.
    ///
    /// ```
    /// use progression_testing::mocks::ManualClock;
    /// use progression_core::environment::Clock;
    /// use chrono::Duration;
    ///
    /// let clock = ManualClock::starting_at(progression_testing::test_time());
    /// let before = clock.now();
    /// clock.advance(Duration::seconds(90));
    /// assert_eq!(clock.now() - before, Duration::seconds(90));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Create a clock frozen at `time`.
        #[must_use]
        pub fn starting_at(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move the clock forward.
        ///
        /// # Panics
        ///
        /// Panics if the internal lock is poisoned.
        #[allow(clippy::unwrap_used)]
        pub fn advance(&self, by: chrono::Duration) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)]
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(super::test_time())
    }
}

/// The instant every default test clock starts at (2025-01-01 00:00:00 UTC).
///
/// # Panics
///
/// This function will panic if the hardcoded timestamp fails to parse,
/// which should never happen in practice.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_time() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .expect("hardcoded timestamp should always parse")
        .with_timezone(&Utc)
}

// Re-export commonly used items
pub use channel_mocks::InMemoryChannel;
pub use mocks::{FixedClock, ManualClock, test_clock};
pub use store_mocks::{InMemoryProgressStore, InMemorySimulationLog};
