//! Statistical rollup of buffered readings and monthly summaries.
//!
//! The serialized field names match the archive documents already in the
//! blob store, so they stay camelCase and keep `units` for remaining energy.

use crate::telemetry::Reading;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PowerStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub sum: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RangeStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

/// First and last value of a depleting counter over a period.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub start: f64,
    pub end: f64,
    /// `max(0, start - end)`; top-ups never count as negative use
    pub consumed: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodSpan {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// Summary of one unit's readings over one hour or one day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregatedBucket {
    #[serde(rename = "dataPoints")]
    pub sample_count: usize,
    pub power: PowerStats,
    pub current: RangeStats,
    pub voltage: RangeStats,
    pub credit: CounterDelta,
    #[serde(rename = "units")]
    pub energy: CounterDelta,
    pub period: PeriodSpan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub total_days: usize,
    pub avg_daily_power: f64,
    pub total_energy_consumed: f64,
    pub total_credit_consumed: f64,
    pub peak_power: f64,
    pub min_power: f64,
}

/// Roll a list of readings (in arrival order) into one bucket.
///
/// Returns `None` for an empty list.
pub fn aggregate(readings: &[Reading]) -> Option<AggregatedBucket> {
    let first = readings.first()?;
    let last = readings.last()?;

    let power = range_of(readings.iter().map(|r| r.power));
    Some(AggregatedBucket {
        sample_count: readings.len(),
        power: PowerStats {
            avg: power.avg,
            min: power.min,
            max: power.max,
            sum: readings.iter().map(|r| r.power).sum(),
        },
        current: range_of(readings.iter().map(|r| r.current)),
        voltage: range_of(readings.iter().map(|r| r.voltage)),
        credit: delta(first.remaining_credit, last.remaining_credit),
        energy: delta(first.remaining_energy, last.remaining_energy),
        period: PeriodSpan {
            start: first.timestamp,
            end: last.timestamp,
        },
    })
}

fn range_of(values: impl Iterator<Item = f64>) -> RangeStats {
    let mut count = 0usize;
    let mut sum = 0.0;
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for v in values {
        count += 1;
        sum += v;
        min = min.min(v);
        max = max.max(v);
    }
    if count == 0 {
        return RangeStats {
            avg: 0.0,
            min: 0.0,
            max: 0.0,
        };
    }
    RangeStats {
        avg: sum / count as f64,
        min,
        max,
    }
}

fn delta(start: f64, end: f64) -> CounterDelta {
    CounterDelta {
        start,
        end,
        consumed: (start - end).max(0.0),
    }
}

/// Recompute a month's summary from every day present.
pub fn summarize_month(days: &BTreeMap<String, AggregatedBucket>) -> MonthlySummary {
    if days.is_empty() {
        return MonthlySummary::default();
    }
    let count = days.len() as f64;
    let buckets = || days.values();

    MonthlySummary {
        total_days: days.len(),
        avg_daily_power: buckets().map(|d| d.power.avg).sum::<f64>() / count,
        total_energy_consumed: buckets().map(|d| d.energy.consumed).sum(),
        total_credit_consumed: buckets().map(|d| d.credit.consumed).sum(),
        peak_power: buckets().map(|d| d.power.max).fold(f64::NEG_INFINITY, f64::max),
        min_power: buckets().map(|d| d.power.min).fold(f64::INFINITY, f64::min),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn reading(minute: i64, power: f64, credit: f64, energy: f64) -> Reading {
        let base = DateTime::parse_from_rfc3339("2025-01-15T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        Reading {
            timestamp: base + Duration::minutes(minute),
            power,
            current: power / 125.0,
            voltage: 230.0,
            remaining_credit: credit,
            remaining_energy: energy,
        }
    }

    #[test]
    fn test_aggregate_two_readings() {
        let readings = vec![
            reading(0, 250.0, 3000.0, 10.0),
            reading(30, 260.0, 2800.0, 9.5),
        ];
        let bucket = aggregate(&readings).unwrap();

        assert_eq!(bucket.sample_count, 2);
        assert_eq!(
            bucket.power,
            PowerStats {
                avg: 255.0,
                min: 250.0,
                max: 260.0,
                sum: 510.0
            }
        );
        assert_eq!(
            bucket.credit,
            CounterDelta {
                start: 3000.0,
                end: 2800.0,
                consumed: 200.0
            }
        );
        assert_eq!(bucket.energy.consumed, 0.5);
        assert_eq!(bucket.voltage.avg, 230.0);
        assert_eq!(bucket.period.start, readings[0].timestamp);
        assert_eq!(bucket.period.end, readings[1].timestamp);
    }

    #[test]
    fn test_top_up_clamps_consumption() {
        let readings = vec![
            reading(0, 100.0, 200.0, 1.0),
            reading(10, 100.0, 5200.0, 21.0),
        ];
        let bucket = aggregate(&readings).unwrap();
        assert_eq!(bucket.credit.consumed, 0.0);
        assert_eq!(bucket.energy.consumed, 0.0);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate(&[]).is_none());
    }

    #[test]
    fn test_power_ordering_holds() {
        let readings: Vec<Reading> = [310.0, 0.0, 1650.5, 42.0, 42.0]
            .iter()
            .enumerate()
            .map(|(i, p)| reading(i as i64, *p, 1000.0, 5.0))
            .collect();
        let bucket = aggregate(&readings).unwrap();
        assert!(bucket.power.min <= bucket.power.avg);
        assert!(bucket.power.avg <= bucket.power.max);
        assert_eq!(bucket.power.min, 0.0);
        assert_eq!(bucket.power.max, 1650.5);
    }

    #[test]
    fn test_wire_format() {
        let bucket = aggregate(&[reading(0, 250.0, 3000.0, 10.0)]).unwrap();
        let json = serde_json::to_value(&bucket).unwrap();

        assert_eq!(json["dataPoints"], 1);
        assert_eq!(json["power"]["sum"], 250.0);
        assert_eq!(json["units"]["start"], 10.0);
        assert!(json["period"]["start"].is_string());

        let back: AggregatedBucket = serde_json::from_value(json).unwrap();
        assert_eq!(back, bucket);
    }

    #[test]
    fn test_summarize_month() {
        let mut days = BTreeMap::new();
        days.insert(
            "2025-01-14".to_string(),
            aggregate(&[
                reading(0, 200.0, 3000.0, 10.0),
                reading(60, 400.0, 2900.0, 9.0),
            ])
            .unwrap(),
        );
        days.insert(
            "2025-01-15".to_string(),
            aggregate(&[
                reading(0, 100.0, 2900.0, 9.0),
                reading(60, 100.0, 2850.0, 8.0),
            ])
            .unwrap(),
        );

        let summary = summarize_month(&days);
        assert_eq!(
            summary,
            MonthlySummary {
                total_days: 2,
                avg_daily_power: 200.0,
                total_energy_consumed: 2.0,
                total_credit_consumed: 150.0,
                peak_power: 400.0,
                min_power: 100.0,
            }
        );
    }

    #[test]
    fn test_summarize_empty_month() {
        assert_eq!(summarize_month(&BTreeMap::new()), MonthlySummary::default());
    }
}
