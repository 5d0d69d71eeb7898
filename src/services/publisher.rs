//! Periodic telemetry publisher
//!
//! Spawned by the engine runner for the lifetime of a session. Each tick it
//! copies the latest snapshot from the watch channel and publishes it
//! through the sink. A failed or slow publish is logged and counted; the
//! loop keeps going and missed ticks are skipped rather than queued.

use crate::domain::session::{epoch_ms, SessionSnapshot, SessionSummary};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::sink::{PublishError, TelemetryPayload, TelemetrySink};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct PublisherSettings {
    pub interval: Duration,
    /// Upper bound for a single sink call
    pub timeout: Duration,
    pub device_id: String,
}

impl PublisherSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: Duration::from_secs(config.publish_interval_secs().max(1)),
            timeout: Duration::from_millis(config.publish_timeout_ms()),
            device_id: config.device_id().to_string(),
        }
    }
}

pub struct TelemetryPublisher {
    sink: Arc<dyn TelemetrySink>,
    snapshots: watch::Receiver<Option<SessionSnapshot>>,
    settings: PublisherSettings,
    metrics: Arc<Metrics>,
}

impl TelemetryPublisher {
    pub fn new(
        sink: Arc<dyn TelemetrySink>,
        snapshots: watch::Receiver<Option<SessionSnapshot>>,
        settings: PublisherSettings,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { sink, snapshots, settings, metrics }
    }

    /// Publish until `stop` flips to true or its sender goes away
    pub async fn run(self, mut stop: watch::Receiver<bool>) {
        let mut ticker = interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        debug!(interval_s = %self.settings.interval.as_secs(), "publisher_started");

        loop {
            tokio::select! {
                biased;
                changed = stop.changed() => {
                    if changed.is_err() || *stop.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.publish_once().await {
                        Ok(true) => self.metrics.record_publish(true),
                        Ok(false) => {}
                        Err(e) => {
                            self.metrics.record_publish(false);
                            warn!(error = %e, "telemetry_publish_failed");
                        }
                    }
                }
            }
        }
        debug!("publisher_stopped");
    }

    /// Publish the current snapshot. `Ok(false)` when there is no session.
    pub async fn publish_once(&self) -> Result<bool, PublishError> {
        let snapshot = self.snapshots.borrow().clone();
        let Some(snapshot) = snapshot else {
            return Ok(false);
        };
        let payload = TelemetryPayload::from_snapshot(&snapshot, &self.settings.device_id, epoch_ms());
        timeout(self.settings.timeout, self.sink.publish(&payload))
            .await
            .map_err(|_| PublishError::Timeout)??;
        debug!(
            session_id = %payload.session_id,
            distance_m = format!("{:.1}", payload.distance_meters),
            duration_s = %payload.duration_seconds,
            "telemetry_published"
        );
        Ok(true)
    }
}

/// Deliver the final session through the sink's completion path
pub async fn publish_summary(
    sink: &dyn TelemetrySink,
    summary: &SessionSummary,
    publish_timeout: Duration,
    metrics: &Metrics,
) -> Result<(), PublishError> {
    let result = timeout(publish_timeout, sink.publish_summary(summary))
        .await
        .map_err(|_| PublishError::Timeout)
        .and_then(|r| r);
    metrics.record_publish(result.is_ok());
    match &result {
        Ok(()) => info!(
            session_id = %summary.session_id,
            points = %summary.route_points.len(),
            "session_summary_published"
        ),
        Err(e) => warn!(session_id = %summary.session_id, error = %e, "session_summary_publish_failed"),
    }
    result
}
