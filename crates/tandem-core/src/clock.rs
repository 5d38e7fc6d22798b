//! Time source injected into every component that reads the current time.

use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

/// The earliest representable instant; the implicit cursor and lower
/// checkpoint before anything has been written.
pub fn start_of_time() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Truncate an instant to millisecond precision.
pub fn truncate_millis(time: DateTime<Utc>) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(time.timestamp_millis())
        .single()
        .unwrap_or(time)
}

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock, truncated to milliseconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        truncate_millis(Utc::now())
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct FakeClock {
    now: Mutex<DateTime<Utc>>,
    auto_increment: Mutex<Option<Duration>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(truncate_millis(now)),
            auto_increment: Mutex::new(None),
        }
    }

    /// Advance by `step` after every read of the clock.
    pub fn with_auto_increment(self, step: Duration) -> Self {
        *self.auto_increment.lock() = Some(step);
        self
    }

    pub fn set_to(&self, time: DateTime<Utc>) {
        *self.now.lock() = truncate_millis(time);
    }

    pub fn advance_by(&self, by: Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn advance_one_milli(&self) {
        self.advance_by(Duration::milliseconds(1));
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        let mut now = self.now.lock();
        let current = *now;
        if let Some(step) = *self.auto_increment.lock() {
            *now += step;
        }
        current
    }
}
