//! Telemetry sources delivering per-building unit snapshots.

use crate::error::Result;
use crate::telemetry::{parse_units, UnitsSnapshot};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Callback receiving each fresh snapshot of a building's units.
pub type SnapshotHandler = Arc<dyn Fn(UnitsSnapshot) + Send + Sync>;

pub trait TelemetrySource: Send + Sync {
    /// Start delivering snapshots of `building_id` to `handler` until the
    /// returned subscription is cancelled or dropped.
    fn subscribe(&self, building_id: &str, handler: SnapshotHandler) -> Result<Subscription>;
}

/// Handle of a live subscription. Teardown runs exactly once, on `cancel`
/// or on drop.
pub struct Subscription {
    teardown: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(teardown: impl FnOnce() + Send + 'static) -> Self {
        Self {
            teardown: Some(Box::new(teardown)),
        }
    }

    pub fn cancel(mut self) {
        self.run_teardown();
    }

    fn run_teardown(&mut self) {
        if let Some(teardown) = self.teardown.take() {
            teardown();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.run_teardown();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("live", &self.teardown.is_some())
            .finish()
    }
}

type Subscribers = HashMap<String, Vec<(u64, SnapshotHandler)>>;

/// In-process source fed by `publish`. Used for embedding and in tests.
#[derive(Default)]
pub struct ChannelTelemetrySource {
    subscribers: Arc<Mutex<Subscribers>>,
    next_id: AtomicU64,
}

impl ChannelTelemetrySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a snapshot to every subscriber of `building_id`. Returns
    /// false when nobody is subscribed.
    pub fn publish(&self, building_id: &str, units: UnitsSnapshot) -> bool {
        // handlers run outside the lock so they may subscribe or cancel
        let handlers: Vec<SnapshotHandler> = match lock(&self.subscribers).get(building_id) {
            Some(subs) if !subs.is_empty() => subs.iter().map(|(_, h)| Arc::clone(h)).collect(),
            _ => return false,
        };
        for handler in handlers {
            handler(units.clone());
        }
        true
    }

    /// Parse a raw units document and publish it.
    pub fn publish_json(&self, building_id: &str, doc: &Value) -> bool {
        self.publish(building_id, parse_units(doc))
    }

    pub fn subscriber_count(&self, building_id: &str) -> usize {
        lock(&self.subscribers)
            .get(building_id)
            .map_or(0, Vec::len)
    }
}

impl TelemetrySource for ChannelTelemetrySource {
    fn subscribe(&self, building_id: &str, handler: SnapshotHandler) -> Result<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.subscribers)
            .entry(building_id.to_string())
            .or_default()
            .push((id, handler));

        let subscribers = Arc::clone(&self.subscribers);
        let building = building_id.to_string();
        Ok(Subscription::new(move || {
            let mut subs = lock(&subscribers);
            if let Some(list) = subs.get_mut(&building) {
                list.retain(|(sid, _)| *sid != id);
                if list.is_empty() {
                    subs.remove(&building);
                }
            }
        }))
    }
}

fn lock(subscribers: &Mutex<Subscribers>) -> MutexGuard<'_, Subscribers> {
    subscribers
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
