//! Periodic rollup of closed hour and day buckets.
//!
//! A trigger flushes every buffered period that has ended by the time it
//! fires, never the live one, so a flush cannot race with readings still
//! arriving for the period it summarizes. Trigger jitter around a period
//! boundary at worst delays a period to the next trigger.

use crate::archive::ArchiveStore;
use crate::buffer::AggregationBuffer;
use crate::config::DailySchedule;
use crate::period::{next_utc_midnight, Granularity};
use crate::summary::aggregate;
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info};

/// Liveness of one building's collection run, shared by its subscription
/// handler and its timers.
#[derive(Debug)]
pub struct RunFlag {
    running: RwLock<bool>,
}

impl Default for RunFlag {
    fn default() -> Self {
        Self {
            running: RwLock::new(true),
        }
    }
}

impl RunFlag {
    pub fn is_running(&self) -> bool {
        *self
            .running
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Clear the flag. Returns once no `while_running` section is executing.
    pub fn stop(&self) {
        *self
            .running
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = false;
    }

    /// Run `f` only while the flag is set; `stop` waits for it to finish.
    pub fn while_running<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        let guard = self
            .running
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if *guard {
            Some(f())
        } else {
            None
        }
    }
}

/// Outcome of flushing one period of one building.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub granularity: Granularity,
    pub period_id: String,
    /// Units whose bucket was persisted
    pub flushed: usize,
    /// Units whose drained bucket was lost to a persistence failure
    pub dropped: usize,
}

/// Timer tasks of one building. Dropping the handle aborts them.
pub struct RollupTimers {
    handles: Vec<JoinHandle<()>>,
}

impl RollupTimers {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn abort(&self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

impl Drop for RollupTimers {
    fn drop(&mut self) {
        self.abort();
    }
}

pub struct RollupScheduler {
    buffer: Arc<AggregationBuffer>,
    archive: ArchiveStore,
    hourly_interval: Duration,
    daily: DailySchedule,
}

impl RollupScheduler {
    pub fn new(
        buffer: Arc<AggregationBuffer>,
        archive: ArchiveStore,
        hourly_interval: Duration,
        daily: DailySchedule,
    ) -> Self {
        Self {
            buffer,
            archive,
            hourly_interval,
            daily,
        }
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    /// Flush every hour of the building that ended at or before `now`.
    pub async fn flush_hourly(&self, building_id: &str, now: DateTime<Utc>) -> Vec<FlushReport> {
        self.flush_closed(building_id, Granularity::Hour, now).await
    }

    /// Flush every day of the building that ended at or before `now`.
    pub async fn flush_daily(&self, building_id: &str, now: DateTime<Utc>) -> Vec<FlushReport> {
        self.flush_closed(building_id, Granularity::Day, now).await
    }

    async fn flush_closed(
        &self,
        building_id: &str,
        granularity: Granularity,
        now: DateTime<Utc>,
    ) -> Vec<FlushReport> {
        let periods = self.buffer.closed_periods(building_id, granularity, now);
        if periods.is_empty() {
            debug!(building = %building_id, %granularity, "no closed periods to roll up");
        }
        let mut reports = Vec::with_capacity(periods.len());
        for period_id in periods {
            reports.push(
                self.flush_period(building_id, granularity, &period_id)
                    .await,
            );
        }
        reports
    }

    /// Drain, summarize and persist every unit bucket of one period.
    ///
    /// Persistence is at-most-once: a bucket whose write fails is logged and
    /// dropped, its readings are not put back into the buffer.
    pub async fn flush_period(
        &self,
        building_id: &str,
        granularity: Granularity,
        period_id: &str,
    ) -> FlushReport {
        let mut report = FlushReport {
            granularity,
            period_id: period_id.to_string(),
            flushed: 0,
            dropped: 0,
        };

        let units = self
            .buffer
            .units_with_data(building_id, granularity, period_id);
        if units.is_empty() {
            debug!(building = %building_id, %granularity, period = %period_id, "nothing to roll up");
            return report;
        }
        info!(
            building = %building_id,
            %granularity,
            period = %period_id,
            units = units.len(),
            "aggregating buffered data"
        );

        for unit_id in units {
            let readings = self
                .buffer
                .drain_bucket(building_id, &unit_id, granularity, period_id);
            let Some(bucket) = aggregate(&readings) else {
                continue;
            };

            let saved = match granularity {
                Granularity::Hour => {
                    self.archive
                        .append_hourly(building_id, &unit_id, period_id, &bucket)
                        .await
                }
                Granularity::Day => {
                    self.archive
                        .append_daily(building_id, &unit_id, period_id, &bucket)
                        .await
                }
            };

            match saved {
                Ok(()) => report.flushed += 1,
                Err(e) => {
                    error!(
                        building = %building_id,
                        unit = %unit_id,
                        %granularity,
                        period = %period_id,
                        samples = readings.len(),
                        error = %e,
                        "failed to persist rollup; drained readings dropped"
                    );
                    report.dropped += 1;
                }
            }
        }

        report
    }

    /// Spawn the hourly and daily triggers of a building on `runtime`. Each
    /// trigger checks `run` before flushing.
    pub fn schedule(
        self: &Arc<Self>,
        building_id: &str,
        run: Arc<RunFlag>,
        runtime: &Handle,
    ) -> RollupTimers {
        let hourly = {
            let scheduler = Arc::clone(self);
            let building = building_id.to_string();
            let run = Arc::clone(&run);
            let period = self.hourly_interval;
            runtime.spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // the first tick completes immediately
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if !run.is_running() {
                        break;
                    }
                    scheduler.flush_hourly(&building, Utc::now()).await;
                }
            })
        };

        let daily = {
            let scheduler = Arc::clone(self);
            let building = building_id.to_string();
            let schedule = self.daily;
            runtime.spawn(async move {
                match schedule {
                    DailySchedule::Midnight => loop {
                        let now = Utc::now();
                        let wait = (next_utc_midnight(now) - now)
                            .to_std()
                            .unwrap_or(Duration::ZERO);
                        debug!(building = %building, wait_secs = wait.as_secs(), "daily rollup armed");
                        sleep(wait).await;
                        if !run.is_running() {
                            break;
                        }
                        scheduler.flush_daily(&building, Utc::now()).await;
                    },
                    DailySchedule::Every(period) => {
                        let mut ticker = interval(period);
                        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                        ticker.tick().await;
                        loop {
                            ticker.tick().await;
                            if !run.is_running() {
                                break;
                            }
                            scheduler.flush_daily(&building, Utc::now()).await;
                        }
                    }
                }
            })
        };

        debug!(
            building = %building_id,
            hourly_secs = self.hourly_interval.as_secs(),
            daily = ?self.daily,
            "rollup timers registered"
        );
        RollupTimers {
            handles: vec![hourly, daily],
        }
    }
}
