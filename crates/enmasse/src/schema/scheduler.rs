//! Next-run computation for scheduler jobs.

use chrono::{DateTime, Duration, NaiveDateTime};

use crate::document::Record;

/// Format used for `next_run` and accepted for `start_date`.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Parses a start date given as RFC 3339 or `YYYY-MM-DD HH:MM:SS`.
pub fn parse_datetime(value: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.naive_utc());
    }
    NaiveDateTime::parse_from_str(value, DATETIME_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S"))
        .ok()
}

pub fn format_datetime(value: NaiveDateTime) -> String {
    value.format(DATETIME_FORMAT).to_string()
}

/// Repeat interval of an interval-based job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Interval {
    pub weeks: i64,
    pub days: i64,
    pub hours: i64,
    pub minutes: i64,
    pub seconds: i64,
}

impl Interval {
    /// Reads the interval fields of a scheduler record. Missing fields are zero.
    pub fn from_record(record: &Record) -> Self {
        let get = |key| record.get(key).and_then(|v| v.as_i64()).unwrap_or(0);
        Self {
            weeks: get("weeks"),
            days: get("days"),
            hours: get("hours"),
            minutes: get("minutes"),
            seconds: get("seconds"),
        }
    }

    /// Total length in seconds, saturating on overflow.
    pub fn total_seconds(&self) -> i64 {
        [
            (self.weeks, 7 * 24 * 3600),
            (self.days, 24 * 3600),
            (self.hours, 3600),
            (self.minutes, 60),
            (self.seconds, 1),
        ]
        .iter()
        .fold(0i64, |acc, (n, unit)| {
            acc.saturating_add(n.saturating_mul(*unit))
        })
    }
}

/// Computes when a job first runs.
///
/// A start date in the future is used as is. A past start date is moved
/// forward by whole intervals until it is strictly after `now`. Without a
/// positive interval the start date is kept.
pub fn next_run(start: NaiveDateTime, interval: Interval, now: NaiveDateTime) -> NaiveDateTime {
    let step = interval.total_seconds();
    if start > now || step <= 0 {
        return start;
    }

    let elapsed = (now - start).num_seconds();
    let steps = elapsed / step + 1;
    steps
        .checked_mul(step)
        .and_then(Duration::try_seconds)
        .and_then(|offset| start.checked_add_signed(offset))
        .unwrap_or(start)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> NaiveDateTime {
        parse_datetime(s).unwrap()
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert_eq!(at("2024-01-02 03:04:05"), at("2024-01-02T03:04:05"));
        assert_eq!(at("2024-01-02T05:04:05+02:00"), at("2024-01-02 03:04:05"));
        assert!(parse_datetime("tomorrow").is_none());
    }

    #[test]
    fn test_future_start_is_kept() {
        let start = at("2030-01-01 00:00:00");
        let now = at("2025-06-01 12:00:00");
        let interval = Interval {
            hours: 1,
            ..Default::default()
        };
        assert_eq!(next_run(start, interval, now), start);
    }

    #[test]
    fn test_past_start_advances_by_whole_intervals() {
        let start = at("2025-06-01 10:00:00");
        let now = at("2025-06-01 12:30:00");
        let interval = Interval {
            hours: 1,
            ..Default::default()
        };
        assert_eq!(next_run(start, interval, now), at("2025-06-01 13:00:00"));
    }

    #[test]
    fn test_start_equal_to_now_moves_one_interval() {
        let start = at("2025-06-01 10:00:00");
        let interval = Interval {
            minutes: 15,
            ..Default::default()
        };
        assert_eq!(next_run(start, interval, start), at("2025-06-01 10:15:00"));
    }

    #[test]
    fn test_zero_interval_keeps_start() {
        let start = at("2020-01-01 00:00:00");
        let now = at("2025-01-01 00:00:00");
        assert_eq!(next_run(start, Interval::default(), now), start);
    }

    #[test]
    fn test_interval_total() {
        let interval = Interval {
            weeks: 1,
            days: 1,
            hours: 1,
            minutes: 1,
            seconds: 1,
        };
        assert_eq!(interval.total_seconds(), 604800 + 86400 + 3600 + 60 + 1);
    }
}
