#![allow(dead_code)]

use chrono::{DateTime, Utc};
use energy_history::archive::ArchiveStore;
use energy_history::store::{BlobStore, MemoryBlobStore};
use energy_history::telemetry::{UnitSnapshot, UnitsSnapshot};
use serde_json::Value;
use std::sync::Arc;

pub fn at(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

pub fn unit(power: f64, credit: f64, energy: f64) -> UnitSnapshot {
    UnitSnapshot {
        power,
        current: power / 230.0,
        voltage: 230.0,
        remaining_credit: credit,
        remaining_energy: energy,
        ..UnitSnapshot::default()
    }
}

pub fn snapshot(entries: &[(&str, UnitSnapshot)]) -> UnitsSnapshot {
    entries
        .iter()
        .map(|(id, u)| (id.to_string(), u.clone()))
        .collect()
}

pub fn memory_archive() -> (Arc<MemoryBlobStore>, ArchiveStore) {
    let store = Arc::new(MemoryBlobStore::new());
    let archive = ArchiveStore::new(Arc::clone(&store) as Arc<dyn BlobStore>);
    (store, archive)
}

pub async fn read_json(store: &MemoryBlobStore, path: &str) -> Option<Value> {
    store
        .get(path)
        .await
        .unwrap()
        .map(|bytes| serde_json::from_slice(&bytes).unwrap())
}
