//! Injectable time source.

use chrono::{DateTime, Timelike, Utc};
use parking_lot::Mutex;

/// Time as the policy engine sees it.
pub trait Clock: Send + Sync {
    /// Current instant, UTC.
    fn now(&self) -> DateTime<Utc>;

    /// Current hour of day (0-23) in the machine's local timezone. Time
    /// windows are expressed in local hours.
    fn local_hour(&self) -> u8;
}

/// Wall clock. The production time source.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn local_hour(&self) -> u8 {
        chrono::Local::now().hour() as u8
    }
}

/// Hand-cranked clock for tests.
pub struct ManualClock {
    state: Mutex<(DateTime<Utc>, u8)>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>, local_hour: u8) -> Self {
        Self {
            state: Mutex::new((now, local_hour)),
        }
    }

    /// Start at the unix epoch with the given local hour.
    pub fn at_hour(local_hour: u8) -> Self {
        Self::new(DateTime::<Utc>::UNIX_EPOCH, local_hour)
    }

    pub fn set_hour(&self, local_hour: u8) {
        self.state.lock().1 = local_hour;
    }

    pub fn advance(&self, duration: chrono::Duration) {
        let mut state = self.state.lock();
        state.0 += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.state.lock().0
    }

    fn local_hour(&self) -> u8 {
        self.state.lock().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::at_hour(9);
        let t0 = clock.now();
        clock.advance(chrono::Duration::seconds(61));
        assert_eq!(clock.now() - t0, chrono::Duration::seconds(61));
        assert_eq!(clock.local_hour(), 9);
        clock.set_hour(2);
        assert_eq!(clock.local_hour(), 2);
    }

    #[test]
    fn system_clock_hour_in_range() {
        assert!(SystemClock.local_hour() < 24);
    }
}
