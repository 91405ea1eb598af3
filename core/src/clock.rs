//! Time source
//!
//! Services never read the system time directly; they ask a `Clock`, so
//! streaks and reminder fire times can be tested against a fixed instant.

use chrono::{DateTime, Duration, Local, NaiveDate, Utc};
use std::sync::{Arc, Mutex};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Current calendar day as the user sees it
    fn today(&self) -> NaiveDate;
}

/// Wall clock; `today()` follows the local timezone
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Clone)]
pub struct FixedClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn today(&self) -> NaiveDate {
        self.now().date_naive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_fixed_clock_advances() {
        let start = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).unwrap();
        let clock = FixedClock::new(start);

        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 3, 10).unwrap());

        clock.advance(Duration::hours(1));

        assert_eq!(clock.now(), start + Duration::hours(1));
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
    }
}
