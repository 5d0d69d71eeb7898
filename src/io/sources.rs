//! Sensor capabilities consumed by the session engine
//!
//! Each source hands out a fresh receiver per subscription. Dropping the
//! receiver (or aborting the task that owns it) ends the subscription.

use crate::domain::types::{ActivityType, HeartRateReading, LocationFix, MetricsSample};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("sensor unavailable: {0}")]
    Unavailable(String),
}

/// Stream of raw location fixes
#[async_trait]
pub trait LocationSource: Send + Sync {
    async fn subscribe(&self) -> Result<mpsc::Receiver<LocationFix>, SensorError>;
}

/// Stream of raw heart-rate readings
#[async_trait]
pub trait HeartRateSource: Send + Sync {
    async fn subscribe(&self) -> Result<mpsc::Receiver<HeartRateReading>, SensorError>;
}

/// Platform exercise session that computes its own fused metrics
#[async_trait]
pub trait ExerciseSession: Send + Sync {
    async fn start(&self, activity: &ActivityType) -> Result<(), SensorError>;

    async fn stop(&self) -> Result<(), SensorError>;

    /// Samples for the exercise started by the last `start`
    async fn metrics_stream(&self) -> Result<mpsc::Receiver<MetricsSample>, SensorError>;
}
