use chrono::{DateTime, Duration, Utc};
use crossbeam::atomic::AtomicCell;

/// Source of the current time for the engine and the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock for tests and replays.
#[derive(Debug)]
pub struct FakeClock {
    now: AtomicCell<DateTime<Utc>>,
}

impl FakeClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        FakeClock {
            now: AtomicCell::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        self.now.store(now);
    }

    pub fn advance(&self, delta: Duration) {
        let current = self.now.load();
        self.now.store(current + delta);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.load()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::clock::{Clock, FakeClock};

    #[test]
    fn test_fake_clock_advance() {
        let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let clock = FakeClock::new(start);

        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), start + Duration::hours(2));

        clock.set(start);
        assert_eq!(clock.now(), start);
    }
}
