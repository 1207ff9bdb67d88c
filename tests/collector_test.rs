mod common;

use common::{memory_archive, snapshot, unit};
use energy_history::buffer::AggregationBuffer;
use energy_history::collector::CollectionController;
use energy_history::config::DailySchedule;
use energy_history::error::AppError;
use energy_history::rollup::RollupScheduler;
use energy_history::source::{ChannelTelemetrySource, SnapshotHandler, Subscription, TelemetrySource};
use energy_history::telemetry::UnitSnapshot;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn controller() -> (CollectionController, Arc<ChannelTelemetrySource>) {
    let buffer = Arc::new(AggregationBuffer::default());
    let (_, archive) = memory_archive();
    let scheduler = Arc::new(RollupScheduler::new(
        Arc::clone(&buffer),
        archive,
        Duration::from_secs(3600),
        DailySchedule::Midnight,
    ));
    let source = Arc::new(ChannelTelemetrySource::new());
    let controller = CollectionController::new(
        buffer,
        scheduler,
        Arc::clone(&source) as Arc<dyn TelemetrySource>,
    );
    (controller, source)
}

#[tokio::test]
async fn test_initialize_is_idempotent() {
    let (controller, _) = controller();
    assert!(!controller.status().initialized);
    controller.initialize();
    controller.initialize();
    assert!(controller.status().initialized);
}

#[tokio::test]
async fn test_restart_keeps_a_single_run() {
    let (controller, source) = controller();
    controller.start("building_001").unwrap();
    controller.start("building_001").unwrap();

    let status = controller.status();
    assert_eq!(status.active_building_ids, vec!["building_001".to_string()]);
    assert_eq!(status.timer_count, 2);
    assert_eq!(source.subscriber_count("building_001"), 1);
}

#[tokio::test]
async fn test_snapshots_are_buffered_while_running() {
    let (controller, source) = controller();
    controller.start("building_001").unwrap();

    let delivered = source.publish(
        "building_001",
        snapshot(&[
            ("unit_001", unit(250.0, 3000.0, 100.0)),
            ("unit_002", unit(1600.0, 400.0, 10.0)),
            (
                "unit_003",
                UnitSnapshot {
                    is_active: false,
                    ..unit(0.0, 0.0, 0.0)
                },
            ),
        ]),
    );
    assert!(delivered);

    // hour and day bucket for each active unit
    assert_eq!(controller.status().buffered_key_count, 4);

    let live = controller.live_view("building_001").unwrap();
    assert_eq!(live.stats.total_units, 3);
    assert_eq!(live.stats.total_power, "1850.00");
    assert_eq!(
        live.alerts,
        vec![
            "unit_002: Critical - Low credit (₦400)".to_string(),
            "unit_002: High consumption detected (1600.00W)".to_string(),
            "unit_003: Critical - Low credit (₦0)".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_raw_documents_are_coerced() {
    let (controller, source) = controller();
    controller.start("building_001").unwrap();

    source.publish_json(
        "building_001",
        &json!({"unit_001": {"power": "250.5W", "remaining_credit": 1200}}),
    );
    let live = controller.live_view("building_001").unwrap();
    assert_eq!(live.stats.total_power, "250.50");
    assert_eq!(live.stats.total_credit, "1200.00");
}

#[tokio::test]
async fn test_stop_tears_down_everything() {
    let (controller, source) = controller();
    controller.start("building_001").unwrap();
    source.publish("building_001", snapshot(&[("unit_001", unit(250.0, 3000.0, 100.0))]));
    assert_eq!(controller.status().buffered_key_count, 2);

    assert!(controller.stop("building_001"));

    let status = controller.status();
    assert!(status.active_building_ids.is_empty());
    assert_eq!(status.timer_count, 0);
    assert_eq!(status.buffered_key_count, 0);
    assert_eq!(source.subscriber_count("building_001"), 0);
    assert!(!source.publish("building_001", snapshot(&[("unit_001", unit(1.0, 1.0, 1.0))])));
    assert!(controller.live_view("building_001").is_none());

    assert!(!controller.stop("building_001"));
}

#[tokio::test]
async fn test_stop_leaves_other_buildings_alone() {
    let (controller, source) = controller();
    controller.start("building_001").unwrap();
    controller.start("building_002").unwrap();
    let units = snapshot(&[("unit_001", unit(250.0, 3000.0, 100.0))]);
    source.publish("building_001", units.clone());
    source.publish("building_002", units);

    controller.stop("building_001");
    let status = controller.status();
    assert_eq!(status.active_building_ids, vec!["building_002".to_string()]);
    assert_eq!(status.buffered_key_count, 2);
    assert!(controller.is_running("building_002"));

    assert_eq!(controller.stop_all(), 1);
    assert_eq!(controller.status().buffered_key_count, 0);
}

#[tokio::test]
async fn test_restart_discards_unflushed_readings() {
    let (controller, source) = controller();
    controller.start("building_001").unwrap();
    source.publish("building_001", snapshot(&[("unit_001", unit(250.0, 3000.0, 100.0))]));
    assert_eq!(controller.status().buffered_key_count, 2);

    controller.start("building_001").unwrap();
    assert_eq!(controller.status().buffered_key_count, 0);
}

struct FailingSource;

impl TelemetrySource for FailingSource {
    fn subscribe(&self, _: &str, _: SnapshotHandler) -> energy_history::Result<Subscription> {
        Err(AppError::Mqtt("broker unreachable".into()))
    }
}

#[tokio::test]
async fn test_failed_subscribe_leaves_building_idle() {
    let buffer = Arc::new(AggregationBuffer::default());
    let (_, archive) = memory_archive();
    let scheduler = Arc::new(RollupScheduler::new(
        Arc::clone(&buffer),
        archive,
        Duration::from_secs(3600),
        DailySchedule::Midnight,
    ));
    let controller = CollectionController::new(buffer, scheduler, Arc::new(FailingSource));

    assert!(matches!(
        controller.start("building_001"),
        Err(AppError::Mqtt(_))
    ));
    let status = controller.status();
    assert!(status.active_building_ids.is_empty());
    assert_eq!(status.timer_count, 0);
}

#[test]
fn test_start_outside_runtime_is_an_error() {
    let (controller, source) = controller();
    assert!(matches!(
        controller.start("building_001"),
        Err(AppError::Runtime(_))
    ));
    assert!(controller.status().active_building_ids.is_empty());
    assert_eq!(source.subscriber_count("building_001"), 0);
}
