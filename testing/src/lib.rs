//! # Branchline Testing
//!
//! Testing utilities and helpers for Branchline.
//!
//! This crate provides:
//! - Deterministic clocks ([`FixedClock`], [`ManualClock`])
//! - In-memory collaborators ([`InMemoryLedger`], [`InMemoryQueueCache`]) with outage switches
//! - Tracing setup for tests
//!
//! ## Example
//!
//! ```
//! use branchline_testing::{InMemoryLedger, test_clock};
//! use branchline_core::environment::Clock;
//!
//! let ledger = InMemoryLedger::new();
//! let clock = test_clock();
//! assert_eq!(clock.now(), clock.now());
//! # drop(ledger);
//! ```

pub mod in_memory;

use branchline_core::environment::Clock;
use chrono::{DateTime, Duration, Utc};

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Duration, Utc};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use branchline_testing::mocks::FixedClock;
    /// use branchline_core::environment::Clock;
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
    /// Clones share the same time, so a test can keep one handle and give another to an engine.
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        micros: Arc<AtomicI64>,
    }

    impl ManualClock {
        /// Start the clock at `time`
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                micros: Arc::new(AtomicI64::new(time.timestamp_micros())),
            }
        }

        /// Jump to `time`
        pub fn set(&self, time: DateTime<Utc>) {
            self.micros.store(time.timestamp_micros(), Ordering::SeqCst);
        }

        /// Move forward by `by`
        pub fn advance(&self, by: Duration) {
            let delta = by.num_microseconds().unwrap_or(i64::MAX);
            self.micros.fetch_add(delta, Ordering::SeqCst);
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> DateTime<Utc> {
            DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst)).unwrap_or_default()
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `fmt` subscriber that writes through the test harness.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "branchline=debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use in_memory::{InMemoryLedger, InMemoryQueueCache};
pub use mocks::{FixedClock, ManualClock, test_clock};
