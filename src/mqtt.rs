use crate::config::MqttConfig;
use crate::error::{current_runtime, AppError, Result};
use crate::source::{SnapshotHandler, Subscription, TelemetrySource};
use crate::telemetry::parse_units;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

// Use the MQTT v5 API surface only
use rumqttc::v5 as mqtt5;
use rumqttc::Transport;

pub type MqttOptions = mqtt5::MqttOptions;
pub type AsyncClient = mqtt5::AsyncClient;
pub type EventLoop = mqtt5::EventLoop;
pub type QoS = mqtt5::mqttbytes::QoS;

const RECONNECT_DELAY: Duration = Duration::from_secs(2);

pub fn build_options(cfg: &MqttConfig, building_id: &str) -> Result<MqttOptions> {
    if cfg.host.trim().is_empty() {
        return Err(AppError::Config("mqtt.host is empty".into()));
    }
    let client_id = format!("energy-history-{building_id}-{}", Uuid::new_v4());
    let mut opts = MqttOptions::new(client_id, &cfg.host, cfg.port);
    opts.set_keep_alive(Duration::from_secs(cfg.keep_alive_secs.unwrap_or(30)));
    opts.set_clean_start(cfg.clean_session.unwrap_or(true));
    if let (Some(u), Some(p)) = (&cfg.username, &cfg.password) {
        opts.set_credentials(u.clone(), p.clone());
    }
    if cfg.port == 8883 {
        opts.set_transport(Transport::tls_with_default_config());
    }
    Ok(opts)
}

pub fn qos(v: u8) -> QoS {
    match v {
        2 => QoS::ExactlyOnce,
        0 => QoS::AtMostOnce,
        _ => QoS::AtLeastOnce,
    }
}

pub fn topic_for(template: &str, building_id: &str) -> String {
    template.replace("{building_id}", building_id)
}

/// Source reading each building's units document from its own MQTT topic.
pub struct MqttTelemetrySource {
    cfg: MqttConfig,
}

impl MqttTelemetrySource {
    pub fn new(cfg: MqttConfig) -> Self {
        Self { cfg }
    }
}

impl TelemetrySource for MqttTelemetrySource {
    fn subscribe(&self, building_id: &str, handler: SnapshotHandler) -> Result<Subscription> {
        let runtime = current_runtime()?;
        let opts = build_options(&self.cfg, building_id)?;
        let topic = topic_for(&self.cfg.topic_template, building_id);
        let qos = qos(self.cfg.qos);
        let (client, eventloop) = AsyncClient::new(opts, 50);

        info!(building = %building_id, topic = %topic, "subscribing to telemetry");
        let building = building_id.to_string();
        let task = runtime.spawn(run_subscription(
            client, eventloop, building, topic, qos, handler,
        ));
        Ok(Subscription::new(move || task.abort()))
    }
}

async fn run_subscription(
    client: AsyncClient,
    mut eventloop: EventLoop,
    building: String,
    topic: String,
    qos: QoS,
    handler: SnapshotHandler,
) {
    loop {
        match eventloop.poll().await {
            // (re)subscribe on every connect, a clean session forgets topics
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::ConnAck(_))) => {
                if let Err(e) = client.try_subscribe(topic.clone(), qos) {
                    warn!(building = %building, topic = %topic, error = %e, "subscribe request failed");
                }
            }
            Ok(mqtt5::Event::Incoming(mqtt5::Incoming::Publish(msg))) => {
                match serde_json::from_slice::<Value>(&msg.payload) {
                    Ok(doc) => {
                        let units = parse_units(&doc);
                        debug!(building = %building, units = units.len(), "snapshot received");
                        handler(units);
                    }
                    Err(e) => {
                        warn!(building = %building, error = %e, "invalid units payload; skipping message");
                    }
                }
            }
            Ok(_) => continue,
            Err(e) => {
                warn!(building = %building, "mqtt error: {e}; reconnecting after short delay");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> MqttConfig {
        MqttConfig {
            host: "localhost".into(),
            port: 1883,
            username: None,
            password: None,
            keep_alive_secs: None,
            clean_session: None,
            qos: 1,
            topic_template: "buildings/{building_id}/units".into(),
        }
    }

    #[test]
    fn test_topic_for() {
        assert_eq!(
            topic_for("buildings/{building_id}/units", "building_001"),
            "buildings/building_001/units"
        );
    }

    #[test]
    fn test_qos_mapping() {
        assert_eq!(qos(0), QoS::AtMostOnce);
        assert_eq!(qos(1), QoS::AtLeastOnce);
        assert_eq!(qos(2), QoS::ExactlyOnce);
        assert_eq!(qos(9), QoS::AtLeastOnce);
    }

    #[test]
    fn test_build_options_client_id_is_unique() {
        let a = build_options(&cfg(), "building_001").unwrap();
        let b = build_options(&cfg(), "building_001").unwrap();
        assert!(a.client_id().starts_with("energy-history-building_001-"));
        assert_ne!(a.client_id(), b.client_id());
    }

    #[test]
    fn test_build_options_rejects_empty_host() {
        let mut c = cfg();
        c.host = " ".into();
        assert!(matches!(
            build_options(&c, "building_001"),
            Err(AppError::Config(_))
        ));
    }

    #[test]
    fn test_subscribe_outside_runtime_is_an_error() {
        let source = MqttTelemetrySource::new(cfg());
        let handler: SnapshotHandler = std::sync::Arc::new(|_| {});
        assert!(matches!(
            source.subscribe("building_001", handler),
            Err(AppError::Runtime(_))
        ));
    }
}
