//! Shared sensor and route types for the run tracker

use serde::{Deserialize, Serialize};

/// Opaque session identifier, caller-supplied or generated at start
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub String);

impl SessionId {
    /// Generate a new time-sortable session id
    pub fn generate() -> Self {
        Self(format!("watch-{}", uuid::Uuid::now_v7()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single raw location reading from the location source
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LocationFix {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Accuracy radius in meters (platform-reported)
    pub accuracy: f64,
    /// Instantaneous speed in m/s, when the platform reports one
    #[serde(default)]
    pub speed: Option<f64>,
    /// Capture time in epoch milliseconds
    pub timestamp_ms: u64,
}

impl LocationFix {
    #[inline]
    pub fn new(latitude: f64, longitude: f64, accuracy: f64, timestamp_ms: u64) -> Self {
        Self { latitude, longitude, altitude: None, accuracy, speed: None, timestamp_ms }
    }

    pub fn with_speed(mut self, speed: f64) -> Self {
        self.speed = Some(speed);
        self
    }

    pub fn with_altitude(mut self, altitude: f64) -> Self {
        self.altitude = Some(altitude);
        self
    }
}

/// A fused sample pushed by the platform exercise session.
///
/// Every field is optional; platforms report whatever they have computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    #[serde(default)]
    pub heart_rate: Option<f64>,
    /// Absolute distance since exercise start (meters)
    #[serde(default)]
    pub distance_meters: Option<f64>,
    #[serde(default)]
    pub speed_mps: Option<f64>,
    #[serde(default)]
    pub pace_seconds_per_km: Option<f64>,
}

/// A raw bpm reading from the heart-rate sensor
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeartRateReading {
    pub bpm: f64,
    pub timestamp_ms: u64,
}

/// Activity kind requested at session start
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    #[default]
    Running,
    Walking,
    Other(String),
}

impl ActivityType {
    pub fn as_str(&self) -> &str {
        match self {
            ActivityType::Running => "running",
            ActivityType::Walking => "walking",
            ActivityType::Other(s) => s,
        }
    }
}

impl std::str::FromStr for ActivityType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "running" | "run" => ActivityType::Running,
            "walking" | "walk" => ActivityType::Walking,
            other => ActivityType::Other(other.to_string()),
        })
    }
}

/// One accepted sample of the route. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RoutePoint {
    pub sequence: u32,
    pub latitude: f64,
    pub longitude: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub accuracy: f64,
    /// Seconds since session start
    pub elapsed_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heart_rate: Option<u32>,
    /// Instantaneous pace (seconds per kilometer)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pace_seconds: Option<u32>,
    pub cumulative_distance_meters: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activity_type_from_str() {
        assert_eq!("RUNNING".parse::<ActivityType>().unwrap(), ActivityType::Running);
        assert_eq!("walk".parse::<ActivityType>().unwrap(), ActivityType::Walking);
        assert!(matches!("trail".parse::<ActivityType>().unwrap(), ActivityType::Other(_)));
    }

    #[test]
    fn test_generated_session_ids_are_unique() {
        let a = SessionId::generate();
        let b = SessionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("watch-"));
    }

    #[test]
    fn test_metrics_sample_partial_json() {
        let sample: MetricsSample = serde_json::from_str(r#"{"heart_rate": 151}"#).unwrap();
        assert_eq!(sample.heart_rate, Some(151.0));
        assert!(sample.distance_meters.is_none());
    }
}
