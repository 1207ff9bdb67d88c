//! Per-building collection runs: subscription, buffering and rollup timers.

use crate::buffer::AggregationBuffer;
use crate::error::{current_runtime, Result};
use crate::metrics::{collect_alerts, compute_building_stats, BuildingStats};
use crate::rollup::{RollupScheduler, RollupTimers, RunFlag};
use crate::source::{SnapshotHandler, Subscription, TelemetrySource};
use crate::telemetry::UnitsSnapshot;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

/// Metrics of the most recent snapshot of a building.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveView {
    pub received_at: DateTime<Utc>,
    pub stats: BuildingStats,
    pub alerts: Vec<String>,
}

impl LiveView {
    pub fn from_snapshot(units: &UnitsSnapshot, received_at: DateTime<Utc>) -> Self {
        Self {
            received_at,
            stats: compute_building_stats(units),
            alerts: collect_alerts(units),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectorStatus {
    pub initialized: bool,
    pub active_building_ids: Vec<String>,
    pub buffered_key_count: usize,
    pub timer_count: usize,
}

struct BuildingRun {
    flag: Arc<RunFlag>,
    subscription: Subscription,
    timers: RollupTimers,
    live: Arc<Mutex<Option<LiveView>>>,
}

impl BuildingRun {
    /// After this returns no handler is ingesting and no trigger will flush.
    fn shutdown(self) {
        self.flag.stop();
        self.timers.abort();
        self.subscription.cancel();
    }
}

pub struct CollectionController {
    buffer: Arc<AggregationBuffer>,
    scheduler: Arc<RollupScheduler>,
    source: Arc<dyn TelemetrySource>,
    runs: Mutex<HashMap<String, BuildingRun>>,
    initialized: AtomicBool,
}

impl CollectionController {
    pub fn new(
        buffer: Arc<AggregationBuffer>,
        scheduler: Arc<RollupScheduler>,
        source: Arc<dyn TelemetrySource>,
    ) -> Self {
        Self {
            buffer,
            scheduler,
            source,
            runs: Mutex::new(HashMap::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub fn buffer(&self) -> &Arc<AggregationBuffer> {
        &self.buffer
    }

    pub fn scheduler(&self) -> &Arc<RollupScheduler> {
        &self.scheduler
    }

    /// Mark the service ready. Repeated calls are no-ops.
    pub fn initialize(&self) {
        if !self.initialized.swap(true, Ordering::SeqCst) {
            info!("historical data service initialized");
        }
    }

    /// Begin collecting for a building. A building that is already running
    /// is stopped first, so at most one run per building ever exists.
    ///
    /// Must be called from within a tokio runtime, which runs the rollup
    /// timers; otherwise `AppError::Runtime` is returned and nothing changes.
    pub fn start(&self, building_id: &str) -> Result<()> {
        let runtime = current_runtime()?;
        let mut runs = self.lock_runs();
        if let Some(previous) = runs.remove(building_id) {
            previous.shutdown();
            let discarded = self.buffer.discard_building(building_id);
            info!(building = %building_id, discarded, "restarting historical data collection");
        }

        let flag = Arc::new(RunFlag::default());
        let live = Arc::new(Mutex::new(None));
        let handler = self.snapshot_handler(building_id, &flag, &live);
        let subscription = self.source.subscribe(building_id, handler)?;
        let timers = self
            .scheduler
            .schedule(building_id, Arc::clone(&flag), &runtime);

        runs.insert(
            building_id.to_string(),
            BuildingRun {
                flag,
                subscription,
                timers,
                live,
            },
        );
        info!(building = %building_id, "started historical data collection");
        Ok(())
    }

    /// Stop a building's run and discard its unflushed readings. Returns
    /// false when the building was not running.
    pub fn stop(&self, building_id: &str) -> bool {
        let mut runs = self.lock_runs();
        let Some(run) = runs.remove(building_id) else {
            debug!(building = %building_id, "stop requested for idle building");
            return false;
        };
        run.shutdown();
        let discarded = self.buffer.discard_building(building_id);
        info!(building = %building_id, discarded, "stopped historical data collection");
        true
    }

    /// Stop every running building. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        let buildings: Vec<String> = self.lock_runs().keys().cloned().collect();
        buildings.iter().filter(|b| self.stop(b)).count()
    }

    pub fn is_running(&self, building_id: &str) -> bool {
        self.lock_runs().contains_key(building_id)
    }

    /// Metrics of the last snapshot received for a running building.
    pub fn live_view(&self, building_id: &str) -> Option<LiveView> {
        let runs = self.lock_runs();
        let run = runs.get(building_id)?;
        let live = run
            .live
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        live.clone()
    }

    pub fn status(&self) -> CollectorStatus {
        let runs = self.lock_runs();
        let mut active_building_ids: Vec<String> = runs.keys().cloned().collect();
        active_building_ids.sort();
        CollectorStatus {
            initialized: self.initialized.load(Ordering::SeqCst),
            active_building_ids,
            buffered_key_count: self.buffer.key_count(),
            timer_count: runs.values().map(|r| r.timers.len()).sum(),
        }
    }

    fn snapshot_handler(
        &self,
        building_id: &str,
        flag: &Arc<RunFlag>,
        live: &Arc<Mutex<Option<LiveView>>>,
    ) -> SnapshotHandler {
        let buffer = Arc::clone(&self.buffer);
        let flag = Arc::clone(flag);
        let live = Arc::clone(live);
        let building = building_id.to_string();
        Arc::new(move |units: UnitsSnapshot| {
            let now = Utc::now();
            let ingested = flag.while_running(|| buffer.ingest(&building, &units, now));
            let Some(buffered) = ingested else {
                return;
            };
            let view = LiveView::from_snapshot(&units, now);
            debug!(
                building = %building,
                buffered,
                total_power = %view.stats.total_power,
                alerts = view.alerts.len(),
                "snapshot ingested"
            );
            *live.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(view);
        })
    }

    fn lock_runs(&self) -> MutexGuard<'_, HashMap<String, BuildingRun>> {
        self.runs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
