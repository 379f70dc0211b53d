//! Time as an injected dependency.
//!
//! Every deadline comparison in the system reads `now` from a [`Clock`], never from
//! `Utc::now()` directly, so tests can pin or advance time.

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
///
/// # Examples
///
/// ```ignore
/// // Production - uses system clock
/// let clock = SystemClock;
/// let now = clock.now();
///
/// // Test - fixed time for deterministic tests
/// let clock = FixedClock::new(Utc.with_ymd_and_hms(2025, 3, 1, 18, 0, 0).unwrap());
/// ```
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time from the operating system
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
