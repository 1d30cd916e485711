use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

/// Wall-clock instant with microsecond resolution, in UTC.
pub type Timestamp = DateTime<Utc>;

/// Clock producing strictly increasing timestamps.
///
/// A simplified hybrid logical clock: the physical component is the wall
/// clock, and when the wall clock stalls or moves backwards the clock
/// advances one microsecond past the last value it handed out. Used by the
/// entity store writer so that records within a session have a total order
/// by `created_at`.
pub struct MonotonicClock {
    last: Mutex<Option<Timestamp>>,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            last: Mutex::new(None),
        }
    }

    /// Next timestamp, strictly after every value previously returned.
    pub fn now(&self) -> Timestamp {
        self.observe(Utc::now())
    }

    /// Fold a producer-supplied instant into the clock.
    ///
    /// Returns `at` if it is after the last value handed out, otherwise one
    /// microsecond past the last value.
    pub fn observe(&self, at: Timestamp) -> Timestamp {
        let mut last = self.last.lock();
        let next = match *last {
            Some(prev) if at <= prev => prev + Duration::microseconds(1),
            _ => at,
        };
        *last = Some(next);
        next
    }

    /// Last timestamp handed out, if any.
    pub fn last(&self) -> Option<Timestamp> {
        *self.last.lock()
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MonotonicClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonotonicClock")
            .field("last", &self.last())
            .finish()
    }
}
