//! Time handling: the injectable clock and whole-day arithmetic.
//!
//! Every evaluation pass reads the clock exactly once. All date-relative
//! operators and templates reuse that captured instant, which is what keeps
//! a pass deterministic for a fixed `(context, catalog, now)`.

use std::sync::RwLock;

use chrono::{DateTime, Duration, Utc};

/// Source of "now".
pub trait Clock: Send + Sync {
    /// The current instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
///
/// # Examples
///
/// ```
/// use chrono::{Duration, TimeZone, Utc};
/// use farmdse::time::{Clock, FixedClock};
///
/// let start = Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap();
/// let clock = FixedClock::new(start);
/// clock.advance(Duration::minutes(30));
/// assert_eq!(clock.now(), start + Duration::minutes(30));
/// ```
#[derive(Debug)]
pub struct FixedClock {
    now: RwLock<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock frozen at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: RwLock::new(now),
        }
    }

    /// Move the clock to an absolute instant.
    pub fn set(&self, now: DateTime<Utc>) {
        let mut guard = match self.now.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = now;
    }

    /// Move the clock forward (or backward, for negative durations).
    pub fn advance(&self, by: Duration) {
        let mut guard = match self.now.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(g) => *g,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

/// Whole days elapsed from `from` to `to`, truncated toward zero.
///
/// Negative when `to` precedes `from`.
#[must_use]
pub fn whole_days_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    (to - from).num_days()
}

/// Whole days since `date`, as seen from `now`.
#[must_use]
pub fn days_since(date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    whole_days_between(date, now)
}

/// Whole days until `date`, as seen from `now`.
#[must_use]
pub fn days_until(date: DateTime<Utc>, now: DateTime<Utc>) -> i64 {
    whole_days_between(now, date)
}

/// Whole calendar months between `from` and `to`, never negative.
#[must_use]
pub fn whole_months_between(from: DateTime<Utc>, to: DateTime<Utc>) -> i64 {
    use chrono::Datelike;

    if to <= from {
        return 0;
    }
    let mut months = i64::from(to.year() - from.year()) * 12
        + i64::from(to.month()) - i64::from(from.month());
    if to.day() < from.day() {
        months -= 1;
    }
    months.max(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    #[test]
    fn test_whole_days_truncate() {
        assert_eq!(whole_days_between(at(2024, 1, 1, 0), at(2024, 1, 2, 23)), 1);
        assert_eq!(whole_days_between(at(2024, 1, 1, 12), at(2024, 1, 2, 6)), 0);
        assert_eq!(whole_days_between(at(2024, 1, 3, 0), at(2024, 1, 1, 0)), -2);
    }

    #[test]
    fn test_days_since_and_until() {
        let now = at(2024, 3, 10, 9);
        assert_eq!(days_since(at(2024, 3, 1, 9), now), 9);
        assert_eq!(days_until(at(2024, 3, 15, 9), now), 5);
        assert_eq!(days_until(at(2024, 3, 5, 9), now), -5);
    }

    #[test]
    fn test_whole_months() {
        assert_eq!(whole_months_between(at(2023, 1, 15, 0), at(2024, 1, 15, 0)), 12);
        assert_eq!(whole_months_between(at(2023, 1, 15, 0), at(2024, 1, 14, 0)), 11);
        assert_eq!(whole_months_between(at(2024, 1, 15, 0), at(2023, 1, 15, 0)), 0);
    }

    #[test]
    fn test_fixed_clock_moves_only_on_demand() {
        let clock = FixedClock::new(at(2024, 1, 1, 0));
        assert_eq!(clock.now(), clock.now());
        clock.advance(Duration::hours(2));
        assert_eq!(clock.now(), at(2024, 1, 1, 2));
        clock.set(at(2025, 1, 1, 0));
        assert_eq!(clock.now(), at(2025, 1, 1, 0));
    }
}
