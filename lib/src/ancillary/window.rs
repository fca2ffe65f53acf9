use crate::{
    error::{Error, Result},
    time::{self, MILLIS_PER_DAY},
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite};
use std::time::Duration;

/// Marks a side of the window as unbounded.
const UNBOUNDED: i64 = i64::MAX;

/// Time of day of the `time` column in milliseconds, also for times before the epoch.
const TIME_OF_DAY: &str = "(((a.time % 86400000) + 86400000) % 86400000)";

/// Narrows ancillary candidates around a query time.
///
/// The date window bounds the full timestamp (`time - pre_date ..= time + post_date`). The
/// time-of-day window bounds only the time component (`time of day - pre_time ..= time of day +
/// post_time`, modulo 24 hours). Either window is optional but must be bounded on both sides.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TimeWindow {
    pre_time: i64,
    post_time: i64,
    pre_date: i64,
    post_date: i64,
}

impl TimeWindow {
    pub fn unbounded() -> Self {
        Self {
            pre_time: UNBOUNDED,
            post_time: UNBOUNDED,
            pre_date: UNBOUNDED,
            post_date: UNBOUNDED,
        }
    }

    pub fn new(
        pre_time: Option<Duration>,
        post_time: Option<Duration>,
        pre_date: Option<Duration>,
        post_date: Option<Duration>,
    ) -> Result<Self> {
        let (pre_time, post_time) = match (pre_time, post_time) {
            (Some(pre), Some(post)) => {
                let pre = time::duration_millis(pre);
                let post = time::duration_millis(post);

                if pre.saturating_add(post) > MILLIS_PER_DAY {
                    return Err(Error::InvalidTimeWindow(
                        "time of day window spans more than a day",
                    ));
                }

                (pre, post)
            }
            (None, None) => (UNBOUNDED, UNBOUNDED),
            _ => {
                return Err(Error::InvalidTimeWindow(
                    "time of day window bounded on one side only",
                ))
            }
        };

        let (pre_date, post_date) = match (pre_date, post_date) {
            (Some(pre), Some(post)) => (time::duration_millis(pre), time::duration_millis(post)),
            (None, None) => (UNBOUNDED, UNBOUNDED),
            _ => {
                return Err(Error::InvalidTimeWindow(
                    "date window bounded on one side only",
                ))
            }
        };

        Ok(Self {
            pre_time,
            post_time,
            pre_date,
            post_date,
        })
    }

    pub fn time_of_day(pre: Duration, post: Duration) -> Result<Self> {
        Self::new(Some(pre), Some(post), None, None)
    }

    pub fn date(pre: Duration, post: Duration) -> Result<Self> {
        Self::new(None, None, Some(pre), Some(post))
    }

    pub fn is_unbounded(&self) -> bool {
        *self == Self::unbounded()
    }

    fn date_bounds(&self, time: DateTime<Utc>) -> Option<(i64, i64)> {
        if self.pre_date == UNBOUNDED {
            return None;
        }

        let time = time::to_millis(time);

        Some((
            time.saturating_sub(self.pre_date),
            time.saturating_add(self.post_date),
        ))
    }

    fn band(&self, time: DateTime<Utc>) -> Band {
        if self.pre_time == UNBOUNDED {
            return Band::All;
        }

        let offset = time::millis_since_midnight(time);
        let lower = offset - self.pre_time;
        let upper = offset + self.post_time;

        // The band crosses midnight: it's the union of its two ends.
        if lower < 0 || upper >= MILLIS_PER_DAY {
            Band::Wrapped(
                lower.rem_euclid(MILLIS_PER_DAY),
                upper.rem_euclid(MILLIS_PER_DAY),
            )
        } else {
            Band::Between(lower, upper)
        }
    }

    /// Whether a record at `candidate` falls within the window around `time`. Bounds are
    /// inclusive.
    pub fn contains(&self, time: DateTime<Utc>, candidate: DateTime<Utc>) -> bool {
        if let Some((lower, upper)) = self.date_bounds(time) {
            if !(lower..=upper).contains(&time::to_millis(candidate)) {
                return false;
            }
        }

        let time_of_day = time::millis_since_midnight(candidate);

        match self.band(time) {
            Band::All => true,
            Band::Between(lower, upper) => (lower..=upper).contains(&time_of_day),
            Band::Wrapped(lower, upper) => time_of_day >= lower || time_of_day <= upper,
        }
    }

    /// Appends the window as ` AND ...` predicates on the `a.time` column.
    pub(super) fn push_predicates(&self, builder: &mut QueryBuilder<'_, Sqlite>, time: DateTime<Utc>) {
        if let Some((lower, upper)) = self.date_bounds(time) {
            builder
                .push(" AND a.time BETWEEN ")
                .push_bind(lower)
                .push(" AND ")
                .push_bind(upper);
        }

        match self.band(time) {
            Band::All => (),
            Band::Between(lower, upper) => {
                builder
                    .push(format!(" AND {TIME_OF_DAY} BETWEEN "))
                    .push_bind(lower)
                    .push(" AND ")
                    .push_bind(upper);
            }
            Band::Wrapped(lower, upper) => {
                builder
                    .push(format!(" AND ({TIME_OF_DAY} >= "))
                    .push_bind(lower)
                    .push(format!(" OR {TIME_OF_DAY} <= "))
                    .push_bind(upper)
                    .push(")");
            }
        }
    }
}

impl Default for TimeWindow {
    fn default() -> Self {
        Self::unbounded()
    }
}

#[derive(Debug, Eq, PartialEq)]
enum Band {
    All,
    Between(i64, i64),
    Wrapped(i64, i64),
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::TimeZone;
    use proptest::prelude::*;
    use test_strategy::proptest;

    const HOUR: Duration = Duration::from_secs(60 * 60);

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, min, 0).unwrap()
    }

    #[test]
    fn one_sided_windows_are_invalid() {
        assert_matches!(
            TimeWindow::new(Some(HOUR), None, None, None),
            Err(Error::InvalidTimeWindow(_))
        );
        assert_matches!(
            TimeWindow::new(None, None, None, Some(HOUR)),
            Err(Error::InvalidTimeWindow(_))
        );
    }

    #[test]
    fn time_of_day_span_is_limited_to_a_day() {
        assert_matches!(
            TimeWindow::time_of_day(13 * HOUR, 12 * HOUR),
            Err(Error::InvalidTimeWindow(_))
        );
        TimeWindow::time_of_day(12 * HOUR, 12 * HOUR).unwrap();
    }

    #[test]
    fn wraps_around_midnight() {
        let window = TimeWindow::time_of_day(2 * HOUR, HOUR).unwrap();
        let time = at(0, 30);

        assert_eq!(
            window.band(time),
            Band::Wrapped(
                (22 * 60 + 30) * 60 * 1000,
                (60 + 30) * 60 * 1000
            )
        );

        // Just before midnight on a different day, just after midnight.
        assert!(window.contains(time, Utc.with_ymd_and_hms(2024, 4, 20, 23, 50, 0).unwrap()));
        assert!(window.contains(time, at(0, 10)));
        // Boundaries are inclusive.
        assert!(window.contains(time, Utc.with_ymd_and_hms(2024, 4, 30, 22, 30, 0).unwrap()));
        assert!(window.contains(time, at(1, 30)));

        assert!(!window.contains(time, at(12, 0)));
        assert!(!window.contains(time, at(1, 31)));
    }

    #[test]
    fn date_window() {
        let window = TimeWindow::date(HOUR, 2 * HOUR).unwrap();
        let time = at(12, 0);

        assert!(window.contains(time, at(11, 0)));
        assert!(window.contains(time, at(14, 0)));
        assert!(!window.contains(time, at(10, 59)));
        assert!(!window.contains(time, Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap()));
    }

    // Membership of the time-of-day window agrees with the definition by circular offset: the
    // candidate's time of day, shifted by at most one day either way, lies within the band.
    #[proptest]
    fn time_of_day_membership(
        #[strategy(0..MILLIS_PER_DAY)] time: i64,
        #[strategy(0..MILLIS_PER_DAY)] candidate: i64,
        #[strategy(0..=MILLIS_PER_DAY / 2)] pre: i64,
        #[strategy(0..=MILLIS_PER_DAY / 2)] post: i64,
        #[strategy(-1000i64..1000)] day: i64,
    ) {
        let window = TimeWindow::time_of_day(
            Duration::from_millis(pre as u64),
            Duration::from_millis(post as u64),
        )
        .unwrap();

        let query_time = time::from_millis(time).unwrap();
        let candidate_time = time::from_millis(day * MILLIS_PER_DAY + candidate).unwrap();

        let expected = [-MILLIS_PER_DAY, 0, MILLIS_PER_DAY]
            .iter()
            .any(|shift| (time - pre..=time + post).contains(&(candidate + shift)));

        prop_assert_eq!(window.contains(query_time, candidate_time), expected);
    }
}
