//! Time source abstraction.
//!
//! Timestamps are part of every event's hashed content, so reproducible ids
//! need a controllable clock.  Production code uses `SystemClock`; tests
//! substitute `ManualClock`.

use std::sync::Mutex;

use chrono::{DateTime, Duration, SubsecRound, Utc};

/// A source of event timestamps.
///
/// Implementations must return millisecond-precision instants so that a
/// timestamp survives a write/read cycle unchanged.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time, truncated to milliseconds.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now().trunc_subsecs(3)
    }
}

/// A deterministic clock that starts at a fixed instant and advances by a
/// fixed step on every read.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<DateTime<Utc>>,
    step: Duration,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>, step: Duration) -> Self {
        Self {
            current: Mutex::new(start.trunc_subsecs(3)),
            step,
        }
    }

    /// A clock that always returns `instant`.
    pub fn frozen(instant: DateTime<Utc>) -> Self {
        Self::new(instant, Duration::zero())
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        *current = instant.trunc_subsecs(3);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        let now = *current;
        *current = now + self.step;
        now
    }
}
