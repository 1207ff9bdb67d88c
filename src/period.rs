//! Hour and day periods, addressed by UTC period ids.
//!
//! Hour ids look like `2025-01-15-10`, day ids like `2025-01-15`.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Granularity {
    Hour,
    Day,
}

impl Granularity {
    pub fn length(self) -> Duration {
        match self {
            Granularity::Hour => Duration::hours(1),
            Granularity::Day => Duration::days(1),
        }
    }

    /// Id of the period containing `at`.
    pub fn period_id(self, at: DateTime<Utc>) -> String {
        match self {
            Granularity::Hour => at.format("%Y-%m-%d-%H").to_string(),
            Granularity::Day => at.format("%Y-%m-%d").to_string(),
        }
    }

    /// Start instant of the period named by `period_id`, or `None` when the
    /// id is malformed for this granularity.
    pub fn period_start(self, period_id: &str) -> Option<DateTime<Utc>> {
        let naive = match self {
            Granularity::Hour => {
                let (date, hour) = period_id.rsplit_once('-')?;
                if hour.len() != 2 {
                    return None;
                }
                let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
                let hour: u32 = hour.parse().ok()?;
                NaiveDateTime::new(date, NaiveTime::from_hms_opt(hour, 0, 0)?)
            }
            Granularity::Day => {
                let date = NaiveDate::parse_from_str(period_id, "%Y-%m-%d").ok()?;
                date.and_hms_opt(0, 0, 0)?
            }
        };
        Some(Utc.from_utc_datetime(&naive))
    }

    pub fn period_end(self, period_id: &str) -> Option<DateTime<Utc>> {
        self.period_start(period_id).map(|start| start + self.length())
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Granularity::Hour => f.write_str("hour"),
            Granularity::Day => f.write_str("day"),
        }
    }
}

/// Routes a reading to its in-memory bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub building_id: String,
    pub unit_id: String,
    pub granularity: Granularity,
    pub period_id: String,
}

impl BucketKey {
    pub fn new(
        building_id: impl Into<String>,
        unit_id: impl Into<String>,
        granularity: Granularity,
        period_id: impl Into<String>,
    ) -> Self {
        Self {
            building_id: building_id.into(),
            unit_id: unit_id.into(),
            granularity,
            period_id: period_id.into(),
        }
    }

    pub fn period_end(&self) -> Option<DateTime<Utc>> {
        self.granularity.period_end(&self.period_id)
    }
}

/// Date part (`YYYY-MM-DD`) of an hour id, as used for the hourly archive
/// file name.
pub fn date_of_hour_id(hour_id: &str) -> Option<&str> {
    Granularity::Hour.period_start(hour_id)?;
    hour_id.get(..10)
}

/// `(year, month)` strings of a day id, zero padded.
pub fn year_month_of_date(date_key: &str) -> Option<(String, String)> {
    let start = Granularity::Day.period_start(date_key)?;
    Some((start.format("%Y").to_string(), start.format("%m").to_string()))
}

/// Next UTC midnight strictly after `now`.
pub fn next_utc_midnight(now: DateTime<Utc>) -> DateTime<Utc> {
    let tomorrow = now.date_naive() + Duration::days(1);
    Utc.from_utc_datetime(&tomorrow.and_time(NaiveTime::MIN))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    #[test]
    fn test_period_ids() {
        let t = at("2025-01-15T09:05:00Z");
        assert_eq!(Granularity::Hour.period_id(t), "2025-01-15-09");
        assert_eq!(Granularity::Day.period_id(t), "2025-01-15");
    }

    #[test]
    fn test_period_end_crosses_month() {
        assert_eq!(
            Granularity::Day.period_end("2025-02-28"),
            Some(at("2025-03-01T00:00:00Z"))
        );
        assert_eq!(
            Granularity::Hour.period_end("2025-02-28-23"),
            Some(at("2025-03-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_period_bounds() {
        assert_eq!(
            Granularity::Hour.period_start("2025-01-15-09"),
            Some(at("2025-01-15T09:00:00Z"))
        );
        assert_eq!(
            Granularity::Hour.period_end("2025-01-15-23"),
            Some(at("2025-01-16T00:00:00Z"))
        );
        assert_eq!(
            Granularity::Day.period_end("2025-01-31"),
            Some(at("2025-02-01T00:00:00Z"))
        );
    }

    #[test]
    fn test_malformed_period_ids() {
        assert_eq!(Granularity::Hour.period_start("2025-01-15"), None);
        assert_eq!(Granularity::Hour.period_start("2025-01-15-24"), None);
        assert_eq!(Granularity::Hour.period_start("2025-01-15-9"), None);
        assert_eq!(Granularity::Day.period_start("2025-02-30"), None);
        assert_eq!(Granularity::Day.period_start("yesterday"), None);
    }

    #[test]
    fn test_archive_key_helpers() {
        assert_eq!(date_of_hour_id("2025-01-15-09"), Some("2025-01-15"));
        assert_eq!(date_of_hour_id("garbage"), None);
        assert_eq!(
            year_month_of_date("2025-01-15"),
            Some(("2025".to_string(), "01".to_string()))
        );
    }

    #[test]
    fn test_next_utc_midnight() {
        assert_eq!(
            next_utc_midnight(at("2025-01-15T23:59:59Z")),
            at("2025-01-16T00:00:00Z")
        );
        assert_eq!(
            next_utc_midnight(at("2025-01-15T00:00:00Z")),
            at("2025-01-16T00:00:00Z")
        );
    }
}
