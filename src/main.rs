use energy_history::archive::ArchiveStore;
use energy_history::buffer::AggregationBuffer;
use energy_history::collector::CollectionController;
use energy_history::config::Config;
use energy_history::mqtt::MqttTelemetrySource;
use energy_history::rollup::RollupScheduler;
use energy_history::store::FsBlobStore;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();

    let cfg_path =
        std::env::var("APP_CONFIG").unwrap_or_else(|_| "config/config.example.yaml".into());
    let cfg = Config::load(&cfg_path)?;
    info!(
        buildings = cfg.collection.buildings.len(),
        storage = %cfg.storage.root,
        "loaded config"
    );

    let buffer = Arc::new(AggregationBuffer::new(cfg.collection.retention()));
    let archive = ArchiveStore::new(Arc::new(FsBlobStore::new(&cfg.storage.root)));
    let scheduler = Arc::new(RollupScheduler::new(
        Arc::clone(&buffer),
        archive,
        cfg.collection.hourly_interval(),
        cfg.collection.daily_schedule(),
    ));
    let source = Arc::new(MqttTelemetrySource::new(cfg.mqtt.clone()));
    let controller = CollectionController::new(buffer, scheduler, source);

    controller.initialize();
    for building in &cfg.collection.buildings {
        if let Err(e) = controller.start(building) {
            warn!(building = %building, error = %e, "failed to start collection");
        }
    }
    let status = controller.status();
    info!(
        active = status.active_building_ids.len(),
        timers = status.timer_count,
        "collection running"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");
    let stopped = controller.stop_all();
    info!(stopped, "collection stopped");

    Ok(())
}
