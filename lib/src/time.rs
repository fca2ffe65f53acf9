//! Time utilities

use chrono::{DateTime, Utc};
use std::{fmt, time::Duration};

/// Number of milliseconds in a day.
pub(crate) const MILLIS_PER_DAY: i64 = 24 * 60 * 60 * 1000;

/// Returns the number of milliseconds since the unix epoch. This is how times are stored in the
/// catalog.
pub(crate) fn to_millis(time: DateTime<Utc>) -> i64 {
    time.timestamp_millis()
}

/// Returns the time corresponding to the given number of milliseconds since the unix epoch.
pub(crate) fn from_millis(ms: i64) -> Result<DateTime<Utc>, TimeOutOfRange> {
    DateTime::from_timestamp_millis(ms).ok_or(TimeOutOfRange)
}

/// Milliseconds elapsed since the (UTC) midnight preceding `time`.
pub(crate) fn millis_since_midnight(time: DateTime<Utc>) -> i64 {
    to_millis(time).rem_euclid(MILLIS_PER_DAY)
}

/// Converts a duration to milliseconds, saturating at `i64::MAX`.
pub(crate) fn duration_millis(duration: Duration) -> i64 {
    duration.as_millis().try_into().unwrap_or(i64::MAX)
}

pub(crate) fn now() -> DateTime<Utc> {
    Utc::now()
}

#[derive(Debug)]
pub(crate) struct TimeOutOfRange;

impl fmt::Display for TimeOutOfRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "time out of range")
    }
}

impl std::error::Error for TimeOutOfRange {}
