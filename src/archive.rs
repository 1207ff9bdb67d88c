//! Historical archive documents in the blob store.
//!
//! Layout per unit:
//!
//! ```text
//! historical-data/{building}/{unit}/{YYYY}/{MM}/hourly-{YYYY-MM-DD}.json   periodId -> bucket
//! historical-data/{building}/{unit}/{YYYY}/{MM}/daily-{YYYY-MM-DD}.json    one bucket
//! historical-data/{building}/{unit}/{YYYY}/monthly-{YYYY}-{MM}.json        days + summary
//! ```
//!
//! Every update is a full read-modify-write of one document (last writer
//! wins). Writing the same period twice overwrites the entry.

use crate::error::{AppError, Result};
use crate::period::{date_of_hour_id, year_month_of_date, Granularity};
use crate::store::BlobStore;
use crate::summary::{summarize_month, AggregatedBucket, MonthlySummary};
use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

const ROOT: &str = "historical-data";

/// Hourly archive: one file per day, keyed by hour period id.
pub type HourlyArchive = BTreeMap<String, AggregatedBucket>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthlyArchive {
    #[serde(default)]
    pub days: BTreeMap<String, AggregatedBucket>,
    #[serde(default)]
    pub summary: MonthlySummary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryRange {
    Last24Hours,
    Last7Days,
    Last30Days,
}

impl HistoryRange {
    pub fn span(self) -> Duration {
        match self {
            HistoryRange::Last24Hours => Duration::hours(24),
            HistoryRange::Last7Days => Duration::days(7),
            HistoryRange::Last30Days => Duration::days(30),
        }
    }
}

impl FromStr for HistoryRange {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "24h" => Ok(HistoryRange::Last24Hours),
            "7d" => Ok(HistoryRange::Last7Days),
            "30d" => Ok(HistoryRange::Last30Days),
            other => Err(AppError::InvalidRange(format!(
                "{other}; supported: 24h, 7d, 30d"
            ))),
        }
    }
}

impl fmt::Display for HistoryRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryRange::Last24Hours => f.write_str("24h"),
            HistoryRange::Last7Days => f.write_str("7d"),
            HistoryRange::Last30Days => f.write_str("30d"),
        }
    }
}

/// Result of a caller-facing history query.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "granularity", rename_all = "lowercase")]
pub enum RangeArchive {
    Hourly {
        hours: HourlyArchive,
    },
    Daily {
        days: BTreeMap<String, AggregatedBucket>,
        summary: MonthlySummary,
    },
}

pub fn hourly_path(building_id: &str, unit_id: &str, date_key: &str) -> Option<String> {
    let (year, month) = year_month_of_date(date_key)?;
    Some(format!(
        "{ROOT}/{building_id}/{unit_id}/{year}/{month}/hourly-{date_key}.json"
    ))
}

pub fn daily_path(building_id: &str, unit_id: &str, date_key: &str) -> Option<String> {
    let (year, month) = year_month_of_date(date_key)?;
    Some(format!(
        "{ROOT}/{building_id}/{unit_id}/{year}/{month}/daily-{date_key}.json"
    ))
}

pub fn monthly_path(building_id: &str, unit_id: &str, year: i32, month: u32) -> String {
    format!("{ROOT}/{building_id}/{unit_id}/{year:04}/monthly-{year:04}-{month:02}.json")
}

/// Persistence adapter over a [`BlobStore`].
#[derive(Clone)]
pub struct ArchiveStore {
    store: Arc<dyn BlobStore>,
}

impl ArchiveStore {
    pub fn new(store: Arc<dyn BlobStore>) -> Self {
        Self { store }
    }

    /// Insert or overwrite one hour in the unit's hourly file for that day.
    pub async fn append_hourly(
        &self,
        building_id: &str,
        unit_id: &str,
        period_id: &str,
        bucket: &AggregatedBucket,
    ) -> Result<()> {
        let path = date_of_hour_id(period_id)
            .and_then(|date| hourly_path(building_id, unit_id, date))
            .ok_or_else(|| AppError::Storage(format!("invalid hour period id: {period_id}")))?;

        let mut doc: HourlyArchive = self.load_baseline(&path).await?;
        doc.insert(period_id.to_string(), bucket.clone());
        self.save(&path, &doc).await?;

        info!(building = %building_id, unit = %unit_id, period = %period_id, "saved hourly data");
        Ok(())
    }

    /// Write the day's bucket and fold it into the monthly archive.
    pub async fn append_daily(
        &self,
        building_id: &str,
        unit_id: &str,
        date_key: &str,
        bucket: &AggregatedBucket,
    ) -> Result<()> {
        let path = daily_path(building_id, unit_id, date_key)
            .ok_or_else(|| AppError::Storage(format!("invalid day period id: {date_key}")))?;
        self.save(&path, bucket).await?;
        info!(building = %building_id, unit = %unit_id, period = %date_key, "saved daily data");

        let start = Granularity::Day
            .period_start(date_key)
            .ok_or_else(|| AppError::Storage(format!("invalid day period id: {date_key}")))?;
        let monthly = monthly_path(building_id, unit_id, start.year(), start.month());

        let mut doc: MonthlyArchive = self.load_baseline(&monthly).await?;
        doc.days.insert(date_key.to_string(), bucket.clone());
        doc.summary = summarize_month(&doc.days);
        self.save(&monthly, &doc).await?;

        info!(
            building = %building_id,
            unit = %unit_id,
            month = %format!("{}-{:02}", start.year(), start.month()),
            days = doc.summary.total_days,
            "updated monthly summary"
        );
        Ok(())
    }

    /// Rebuild a month's summary from all days present and store it.
    pub async fn recompute_monthly_summary(
        &self,
        building_id: &str,
        unit_id: &str,
        year: i32,
        month: u32,
    ) -> Result<MonthlySummary> {
        if !(1..=12).contains(&month) {
            return Err(AppError::Storage(format!("invalid month: {month}")));
        }
        let path = monthly_path(building_id, unit_id, year, month);
        let mut doc: MonthlyArchive = self.load_baseline(&path).await?;
        doc.summary = summarize_month(&doc.days);
        self.save(&path, &doc).await?;
        Ok(doc.summary)
    }

    /// Stored history of a unit over `range`, ending at `now`.
    ///
    /// Unlike the append paths, a missing archive is reported as
    /// [`AppError::NotFound`] rather than an empty result.
    pub async fn read_range(
        &self,
        building_id: &str,
        unit_id: &str,
        range: HistoryRange,
        now: DateTime<Utc>,
    ) -> Result<RangeArchive> {
        let from = now - range.span();
        match range {
            HistoryRange::Last24Hours => {
                let dates = dates_between(from.date_naive(), now.date_naive());
                let paths: Vec<String> = dates
                    .iter()
                    .map(|d| d.format("%Y-%m-%d").to_string())
                    .filter_map(|date| hourly_path(building_id, unit_id, &date))
                    .collect();
                let docs = futures::future::try_join_all(
                    paths.iter().map(|p| self.load::<HourlyArchive>(p)),
                )
                .await?;
                if docs.iter().all(Option::is_none) {
                    return Err(not_found(building_id, unit_id, range));
                }

                let hours = docs
                    .into_iter()
                    .flatten()
                    .flatten()
                    .filter(|(period_id, _)| {
                        Granularity::Hour
                            .period_start(period_id)
                            .is_some_and(|start| start > from - Duration::hours(1) && start <= now)
                    })
                    .collect();
                Ok(RangeArchive::Hourly { hours })
            }
            HistoryRange::Last7Days | HistoryRange::Last30Days => {
                let months = months_between(from.date_naive(), now.date_naive());
                let paths: Vec<String> = months
                    .iter()
                    .map(|(y, m)| monthly_path(building_id, unit_id, *y, *m))
                    .collect();
                let docs = futures::future::try_join_all(
                    paths.iter().map(|p| self.load::<MonthlyArchive>(p)),
                )
                .await?;
                if docs.iter().all(Option::is_none) {
                    return Err(not_found(building_id, unit_id, range));
                }

                let from_day = from.date_naive();
                let days: BTreeMap<String, AggregatedBucket> = docs
                    .into_iter()
                    .flatten()
                    .flat_map(|doc| doc.days)
                    .filter(|(date_key, _)| {
                        NaiveDate::parse_from_str(date_key, "%Y-%m-%d")
                            .is_ok_and(|d| d >= from_day && d <= now.date_naive())
                    })
                    .collect();
                let summary = summarize_month(&days);
                Ok(RangeArchive::Daily { days, summary })
            }
        }
    }

    /// Load a document for a caller; malformed JSON is an error.
    async fn load<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.store.get(path).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Load a document to merge into. Absent or unreadable documents start
    /// from an empty baseline.
    async fn load_baseline<T: DeserializeOwned + Default>(&self, path: &str) -> Result<T> {
        let Some(bytes) = self.store.get(path).await? else {
            debug!(path = %path, "no existing archive, starting fresh");
            return Ok(T::default());
        };
        match serde_json::from_slice(&bytes) {
            Ok(doc) => Ok(doc),
            Err(e) => {
                warn!(path = %path, error = %e, "unreadable archive document, replacing it");
                Ok(T::default())
            }
        }
    }

    async fn save<T: Serialize + ?Sized>(&self, path: &str, doc: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        self.store.put(path, bytes).await
    }
}

fn not_found(building_id: &str, unit_id: &str, range: HistoryRange) -> AppError {
    AppError::NotFound(format!("no {range} history for {building_id}/{unit_id}"))
}

fn dates_between(from: NaiveDate, to: NaiveDate) -> Vec<NaiveDate> {
    from.iter_days().take_while(|d| *d <= to).collect()
}

fn months_between(from: NaiveDate, to: NaiveDate) -> Vec<(i32, u32)> {
    let mut months = Vec::new();
    let (mut year, mut month) = (from.year(), from.month());
    while (year, month) <= (to.year(), to.month()) {
        months.push((year, month));
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }
    months
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        assert_eq!(
            hourly_path("building_001", "unit_001", "2025-01-15").as_deref(),
            Some("historical-data/building_001/unit_001/2025/01/hourly-2025-01-15.json")
        );
        assert_eq!(
            daily_path("building_001", "unit_001", "2025-01-15").as_deref(),
            Some("historical-data/building_001/unit_001/2025/01/daily-2025-01-15.json")
        );
        assert_eq!(
            monthly_path("building_001", "unit_001", 2025, 1),
            "historical-data/building_001/unit_001/2025/monthly-2025-01.json"
        );
        assert_eq!(hourly_path("b", "u", "not-a-date"), None);
    }

    #[test]
    fn test_history_range_parse() {
        assert_eq!("24h".parse::<HistoryRange>().unwrap(), HistoryRange::Last24Hours);
        assert_eq!("7d".parse::<HistoryRange>().unwrap(), HistoryRange::Last7Days);
        assert_eq!("30d".parse::<HistoryRange>().unwrap(), HistoryRange::Last30Days);
        assert!(matches!(
            "1y".parse::<HistoryRange>(),
            Err(AppError::InvalidRange(_))
        ));
        assert_eq!(HistoryRange::Last7Days.to_string(), "7d");
    }

    #[test]
    fn test_months_between() {
        let d = |s| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        assert_eq!(months_between(d("2025-01-10"), d("2025-01-15")), vec![(2025, 1)]);
        assert_eq!(
            months_between(d("2024-12-20"), d("2025-01-15")),
            vec![(2024, 12), (2025, 1)]
        );
        assert_eq!(dates_between(d("2025-01-14"), d("2025-01-15")).len(), 2);
    }
}
