//! MQTT telemetry sink
//!
//! Publishes run telemetry for the companion device:
//! - run/realtime - Periodic live updates (QoS 0)
//! - run/complete - Final session summary (QoS 1)
//! - run/response - Command responses (QoS 0)

use crate::domain::session::SessionSummary;
use crate::infra::config::Config;
use crate::io::sink::{PublishError, TelemetryPayload, TelemetrySink};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct MqttSink {
    client: AsyncClient,
    device_id: String,
    realtime_topic: String,
    complete_topic: String,
    response_topic: String,
}

impl MqttSink {
    /// Create the sink and spawn its event loop.
    ///
    /// Connects to the broker at the configured MQTT host/port; the event
    /// loop reconnects on its own after errors.
    pub fn new(config: &Config) -> Self {
        let client_id = format!("run-tracker-{}-{}", config.device_id(), std::process::id());
        let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
        mqttoptions.set_keep_alive(Duration::from_secs(30));
        mqttoptions.set_clean_session(true);
        // a full session summary with a long route exceeds the 10 KiB default
        mqttoptions.set_max_packet_size(4 * 1024 * 1024, 4 * 1024 * 1024);

        if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
            mqttoptions.set_credentials(username, password);
        }

        let (client, eventloop) = AsyncClient::new(mqttoptions, 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_sink_connected");
                    }
                    Ok(Event::Incoming(Packet::PubAck(_))) => {
                        debug!("mqtt_sink_puback");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_sink_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        info!(
            host = %config.mqtt_host(),
            port = %config.mqtt_port(),
            realtime = %config.mqtt_realtime_topic(),
            complete = %config.mqtt_complete_topic(),
            "mqtt_sink_started"
        );

        Self {
            client,
            device_id: config.device_id().to_string(),
            realtime_topic: config.mqtt_realtime_topic().to_string(),
            complete_topic: config.mqtt_complete_topic().to_string(),
            response_topic: config.mqtt_response_topic().to_string(),
        }
    }

    async fn send(&self, topic: &str, qos: QoS, body: Vec<u8>) -> Result<(), PublishError> {
        self.client
            .publish(topic, qos, false, body)
            .await
            .map_err(|e| PublishError::Transport(e.to_string()))
    }
}

#[async_trait]
impl TelemetrySink for MqttSink {
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), PublishError> {
        let body = serde_json::to_vec(payload)?;
        // live data is fire-and-forget
        self.send(&self.realtime_topic, QoS::AtMostOnce, body).await
    }

    async fn publish_summary(&self, summary: &SessionSummary) -> Result<(), PublishError> {
        let body = summary.to_json(&self.device_id).into_bytes();
        debug!(
            session_id = %summary.session_id,
            bytes = %body.len(),
            "mqtt_sink_summary"
        );
        self.send(&self.complete_topic, QoS::AtLeastOnce, body).await
    }

    async fn publish_response(&self, response: &serde_json::Value) -> Result<(), PublishError> {
        let body = serde_json::to_vec(response)?;
        self.send(&self.response_topic, QoS::AtMostOnce, body).await
    }
}
