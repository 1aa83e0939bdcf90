//! UTC day arithmetic and the day index backing the coverage matrix

use crate::errors::{AvailError, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Utc};

/// Absolute UTC instant with sub-second precision
pub type TimeInstant = DateTime<Utc>;

pub const SECONDS_PER_DAY: f64 = 86_400.0;

/// Truncate an instant to midnight of its calendar day
pub fn truncate_to_day(t: TimeInstant) -> TimeInstant {
    t.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// First midnight strictly after `t`
pub fn next_midnight(t: TimeInstant) -> TimeInstant {
    truncate_to_day(t) + TimeDelta::days(1)
}

/// Signed number of seconds from `a` to `b`
pub fn seconds_between(a: TimeInstant, b: TimeInstant) -> f64 {
    let delta = b - a;
    delta.num_seconds() as f64 + f64::from(delta.subsec_nanos()) * 1e-9
}

/// Parse the timestamp forms used by FDSN web services
pub fn parse_fdsn_time(ts_str: &str) -> Result<TimeInstant> {
    let ts = ts_str.trim();

    let formats = [
        "%Y-%m-%dT%H:%M:%S%.fZ",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for format in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(ts, format) {
            return Ok(dt.and_utc());
        }
    }

    if let Ok(date) = NaiveDate::parse_from_str(ts, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }

    Err(AvailError::Parse(format!("invalid timestamp '{}'", ts_str)))
}

/// Render an instant the way FDSN query parameters expect it
pub fn format_fdsn_time(t: TimeInstant) -> String {
    t.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string()
}

/// Ordered, gap-free list of UTC midnights covering `[start, stop]` inclusive.
///
/// Row `i` of a coverage matrix corresponds to `days()[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct DayIndex {
    days: Vec<TimeInstant>,
}

impl DayIndex {
    /// Build the index from two instants; both are truncated to midnight
    pub fn new(start: TimeInstant, stop: TimeInstant) -> Result<Self> {
        let first = truncate_to_day(start);
        let last = truncate_to_day(stop);

        if last < first {
            return Err(AvailError::Config(format!(
                "day index stop {} precedes start {}",
                format_fdsn_time(stop),
                format_fdsn_time(start)
            )));
        }

        let count = (last - first).num_days() as usize + 1;
        let days = (0..count)
            .map(|offset| first + TimeDelta::days(offset as i64))
            .collect();

        Ok(Self { days })
    }

    /// Row position of an exact midnight, if indexed
    pub fn index_of(&self, day: TimeInstant) -> Option<usize> {
        self.days.binary_search(&day).ok()
    }

    /// Row position of an exact midnight, failing when outside the window
    pub fn require(&self, day: TimeInstant) -> Result<usize> {
        self.index_of(day).ok_or(AvailError::OutOfWindow { day })
    }

    pub fn days(&self) -> &[TimeInstant] {
        &self.days
    }

    pub fn len(&self) -> usize {
        self.days.len()
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }

    pub fn first(&self) -> TimeInstant {
        self.days[0]
    }

    pub fn last(&self) -> TimeInstant {
        self.days[self.days.len() - 1]
    }

    /// Exclusive end of the covered span (midnight after the last day)
    pub fn end(&self) -> TimeInstant {
        self.last() + TimeDelta::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> TimeInstant {
        Utc.with_ymd_and_hms(y, m, d, h, min, s).unwrap()
    }

    #[test]
    fn test_day_index_construction() {
        let index = DayIndex::new(utc(2020, 1, 1, 0, 0, 0), utc(2020, 1, 5, 0, 0, 0)).unwrap();

        assert_eq!(index.len(), 5);
        assert_eq!(index.first(), utc(2020, 1, 1, 0, 0, 0));
        assert_eq!(index.last(), utc(2020, 1, 5, 0, 0, 0));
        for pair in index.days().windows(2) {
            assert_eq!(pair[1] - pair[0], TimeDelta::days(1));
        }
    }

    #[test]
    fn test_day_index_truncates_bounds() {
        let index = DayIndex::new(utc(2020, 2, 28, 13, 0, 0), utc(2020, 3, 1, 1, 0, 0)).unwrap();

        // 2020 is a leap year
        assert_eq!(index.len(), 3);
        assert_eq!(index.days()[1], utc(2020, 2, 29, 0, 0, 0));
        assert_eq!(index.end(), utc(2020, 3, 2, 0, 0, 0));
    }

    #[test]
    fn test_day_index_rejects_reversed_window() {
        let result = DayIndex::new(utc(2020, 1, 5, 0, 0, 0), utc(2020, 1, 1, 0, 0, 0));
        assert!(matches!(result, Err(AvailError::Config(_))));
    }

    #[test]
    fn test_index_lookup_is_exact() {
        let index = DayIndex::new(utc(2020, 1, 1, 0, 0, 0), utc(2020, 1, 5, 0, 0, 0)).unwrap();

        assert_eq!(index.index_of(utc(2020, 1, 3, 0, 0, 0)), Some(2));
        assert_eq!(index.index_of(utc(2020, 1, 3, 0, 0, 1)), None);
        assert_eq!(index.index_of(utc(2019, 12, 31, 0, 0, 0)), None);
        assert!(matches!(
            index.require(utc(2020, 1, 6, 0, 0, 0)),
            Err(AvailError::OutOfWindow { .. })
        ));
    }

    #[test]
    fn test_midnight_helpers() {
        let t = utc(2019, 5, 3, 1, 20, 59);
        assert_eq!(truncate_to_day(t), utc(2019, 5, 3, 0, 0, 0));
        assert_eq!(next_midnight(t), utc(2019, 5, 4, 0, 0, 0));
        assert_eq!(next_midnight(utc(2019, 5, 3, 0, 0, 0)), utc(2019, 5, 4, 0, 0, 0));
    }

    #[test]
    fn test_seconds_between_keeps_fraction() {
        let start = parse_fdsn_time("2019-05-03T01:20:59.315000Z").unwrap();
        let stop = parse_fdsn_time("2019-05-03T01:23:10.740000Z").unwrap();

        assert!((seconds_between(start, stop) - 131.425).abs() < 1e-9);
        assert!((seconds_between(stop, start) + 131.425).abs() < 1e-9);
    }

    #[test]
    fn test_timestamp_parsing() {
        assert!(parse_fdsn_time("2019-05-03T01:20:59.315000Z").is_ok());
        assert!(parse_fdsn_time("2005-01-01T00:00:00").is_ok());
        assert!(parse_fdsn_time("2005-01-01 00:00:00").is_ok());
        assert_eq!(parse_fdsn_time("2005-01-01").unwrap(), utc(2005, 1, 1, 0, 0, 0));
        assert!(parse_fdsn_time("invalid").is_err());
    }

    #[test]
    fn test_timestamp_formatting() {
        assert_eq!(
            format_fdsn_time(utc(2020, 1, 1, 0, 0, 0)),
            "2020-01-01T00:00:00.000000Z"
        );
    }
}
