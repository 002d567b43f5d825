//! Dependency injection traits for time.
//!
//! Engines never call `Utc::now()` directly; they read the injected [`Clock`] so tests can pin
//! or move time (see `branchline-testing`).

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```
/// use branchline_core::environment::{Clock, SystemClock};
///
/// let clock = SystemClock;
/// let first = clock.now();
/// assert!(clock.now() >= first);
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
