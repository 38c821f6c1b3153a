//! Wall-clock source for file rotation and record timestamps.
//!
//! The writer asks the clock for the local calendar day on every append, so
//! tests pin the day with [`FixedClock`] instead of racing midnight.

use chrono::{DateTime, Local, NaiveDate, SecondsFormat, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Local calendar day used to pick the rotated file.
    fn today(&self) -> NaiveDate;

    /// `now()` as RFC 3339 with millisecond precision and a `Z` suffix.
    fn now_rfc3339(&self) -> String {
        self.now().to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn today(&self) -> NaiveDate {
        Local::now().date_naive()
    }
}

/// A clock frozen at one instant. `today()` is the UTC date of that instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }

    fn today(&self) -> NaiveDate {
        self.0.date_naive()
    }
}
