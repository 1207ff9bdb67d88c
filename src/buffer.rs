use crate::period::{BucketKey, Granularity};
use crate::telemetry::{Reading, UnitsSnapshot};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Default horizon beyond which unflushed buckets are dropped.
pub const DEFAULT_RETENTION_HOURS: i64 = 48;

/// In-memory readings awaiting rollup, bucketed per unit by hour and by day.
///
/// Every operation takes the single lock for its whole critical section and
/// never awaits while holding it, so ingest and drain are atomic with
/// respect to each other.
pub struct AggregationBuffer {
    buckets: Mutex<HashMap<BucketKey, Vec<Reading>>>,
    retention: Duration,
}

impl Default for AggregationBuffer {
    fn default() -> Self {
        Self::new(Duration::hours(DEFAULT_RETENTION_HOURS))
    }
}

impl AggregationBuffer {
    /// A negative retention is treated as zero.
    pub fn new(retention: Duration) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            retention: retention.max(Duration::zero()),
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<BucketKey, Vec<Reading>>> {
        // No critical section can panic half way through a push, so a
        // poisoned map is still consistent.
        self.buckets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Buffer one reading per active unit into the hour and day buckets of
    /// `now`, then purge expired buckets. Returns the number of units
    /// buffered.
    pub fn ingest(&self, building_id: &str, units: &UnitsSnapshot, now: DateTime<Utc>) -> usize {
        let hour_id = Granularity::Hour.period_id(now);
        let day_id = Granularity::Day.period_id(now);

        let mut buckets = self.lock();
        let mut buffered = 0;
        for (unit_id, unit) in units.iter().filter(|(_, u)| u.is_active) {
            let reading = unit.reading_at(now);
            buckets
                .entry(BucketKey::new(building_id, unit_id, Granularity::Hour, &hour_id))
                .or_default()
                .push(reading.clone());
            buckets
                .entry(BucketKey::new(building_id, unit_id, Granularity::Day, &day_id))
                .or_default()
                .push(reading);
            buffered += 1;
        }
        let purged = purge_locked(&mut buckets, now, self.retention);
        drop(buckets);

        if purged > 0 {
            debug!(building = %building_id, purged, "purged expired buckets");
        }
        buffered
    }

    /// Remove and return a bucket's readings. An absent bucket is empty.
    pub fn drain_bucket(
        &self,
        building_id: &str,
        unit_id: &str,
        granularity: Granularity,
        period_id: &str,
    ) -> Vec<Reading> {
        let key = BucketKey::new(building_id, unit_id, granularity, period_id);
        self.lock().remove(&key).unwrap_or_default()
    }

    /// Units of `building_id` holding readings for the given period, sorted.
    pub fn units_with_data(
        &self,
        building_id: &str,
        granularity: Granularity,
        period_id: &str,
    ) -> Vec<String> {
        let mut units: Vec<String> = self
            .lock()
            .iter()
            .filter(|(k, readings)| {
                k.building_id == building_id
                    && k.granularity == granularity
                    && k.period_id == period_id
                    && !readings.is_empty()
            })
            .map(|(k, _)| k.unit_id.clone())
            .collect();
        units.sort();
        units
    }

    /// Period ids of `building_id` whose buckets hold readings and ended at
    /// or before `now`, oldest first.
    pub fn closed_periods(
        &self,
        building_id: &str,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Vec<String> {
        let mut periods: Vec<String> = self
            .lock()
            .iter()
            .filter(|(k, readings)| {
                k.building_id == building_id
                    && k.granularity == granularity
                    && !readings.is_empty()
                    && k.period_end().is_some_and(|end| end <= now)
            })
            .map(|(k, _)| k.period_id.clone())
            .collect();
        periods.sort();
        periods.dedup();
        periods
    }

    /// Drop every bucket of a building. Returns the number of keys removed.
    pub fn discard_building(&self, building_id: &str) -> usize {
        let mut buckets = self.lock();
        let before = buckets.len();
        buckets.retain(|k, _| k.building_id != building_id);
        before - buckets.len()
    }

    /// Drop buckets whose period ended before `now - retention`.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        purge_locked(&mut self.lock(), now, self.retention)
    }

    pub fn key_count(&self) -> usize {
        self.lock().len()
    }

    /// Number of distinct (building, unit) pairs currently buffered.
    pub fn unit_count(&self) -> usize {
        let buckets = self.lock();
        let mut pairs: Vec<(&str, &str)> = buckets
            .keys()
            .map(|k| (k.building_id.as_str(), k.unit_id.as_str()))
            .collect();
        pairs.sort_unstable();
        pairs.dedup();
        pairs.len()
    }

    pub fn contains(&self, key: &BucketKey) -> bool {
        self.lock().contains_key(key)
    }
}

fn purge_locked(
    buckets: &mut HashMap<BucketKey, Vec<Reading>>,
    now: DateTime<Utc>,
    retention: Duration,
) -> usize {
    // a horizon reaching before the representable range expires nothing
    let Some(cutoff) = now.checked_sub_signed(retention) else {
        return 0;
    };
    let before = buckets.len();
    buckets.retain(|key, _| match key.period_end() {
        Some(end) => end >= cutoff,
        // malformed period id, never produced by ingest
        None => false,
    });
    before - buckets.len()
}
