//! Time abstraction for testability
//!
//! Age-based queries and retention compare record timestamps against "now".
//! Routing "now" through a [`Clock`] lets tests pin it.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

/// Source of the current UTC time
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real clock implementation using system time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
///
/// Clones share the same underlying time.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<RwLock<DateTime<Utc>>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(RwLock::new(start)),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        *self.now.write() += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.write() = to;
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> DateTime<Utc> {
        *self.now.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances_shared_time() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        let shared = clock.clone();

        clock.advance(Duration::seconds(30));
        assert_eq!(shared.now_utc(), start + Duration::seconds(30));

        shared.set(start);
        assert_eq!(clock.now_utc(), start);
    }

    #[test]
    fn test_system_clock_is_monotone_enough() {
        let a = SystemClock.now_utc();
        let b = SystemClock.now_utc();
        assert!(b >= a);
    }
}
