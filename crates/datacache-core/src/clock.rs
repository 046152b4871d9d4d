//! Wall-clock source for entry timestamps.
//!
//! TTL and snapshot-age checks read time through [`Clock`] so tests can move
//! time forward without sleeping.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::lock;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: Duration) {
        *lock(&self.now) += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *lock(&self.now) = to;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        assert_eq!(clock.now(), start);
        clock.advance(Duration::seconds(90));
        assert_eq!(clock.now(), start + Duration::seconds(90));
    }

    #[test]
    fn test_manual_clock_survives_poisoned_lock() {
        let start = Utc::now();
        let clock = std::sync::Arc::new(ManualClock::new(start));
        let holder = std::sync::Arc::clone(&clock);
        let _ = std::thread::spawn(move || {
            let _guard = holder.now.lock().unwrap();
            panic!("poison the clock");
        })
        .join();

        assert_eq!(clock.now(), start);
        clock.set(start + Duration::minutes(5));
        clock.advance(Duration::minutes(1));
        assert_eq!(clock.now(), start + Duration::minutes(6));
    }
}
