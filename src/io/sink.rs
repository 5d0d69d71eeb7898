//! Outbound telemetry for the companion device
//!
//! The publisher emits a [`TelemetryPayload`] every interval while a
//! session exists; the final [`SessionSummary`] goes through the
//! completion path once the session stops.

use crate::domain::session::{SessionSnapshot, SessionState, SessionSummary};
use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("publish timed out")]
    Timeout,
    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Periodic live update
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), PublishError>;

    /// Final session, delivered at least once where the transport allows
    async fn publish_summary(&self, summary: &SessionSummary) -> Result<(), PublishError>;

    /// Reply to a companion command. Transports without a reply channel ignore it.
    async fn publish_response(&self, _response: &serde_json::Value) -> Result<(), PublishError> {
        Ok(())
    }
}

/// Latest route point as sent in live updates
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrentPoint {
    pub latitude: f64,
    pub longitude: f64,
    /// 1-based on the wire
    pub sequence: u32,
    /// Seconds since session start
    pub t: u32,
    pub acc: f64,
}

/// Live update for the companion device
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryPayload {
    pub device: String,
    pub session_id: String,
    pub state: SessionState,
    pub distance_meters: f64,
    pub duration_seconds: u32,
    pub heart_rate: Option<u32>,
    pub pace_seconds: Option<u32>,
    pub average_pace_seconds: Option<u32>,
    pub calories: u32,
    pub current_point: Option<CurrentPoint>,
    /// Publish time (epoch ms)
    pub timestamp: u64,
}

impl TelemetryPayload {
    pub fn from_snapshot(snapshot: &SessionSnapshot, device: &str, timestamp: u64) -> Self {
        let last = snapshot.last_point.as_ref();
        Self {
            device: device.to_string(),
            session_id: snapshot.session_id.to_string(),
            state: snapshot.state,
            distance_meters: snapshot.total_distance_meters,
            duration_seconds: snapshot.duration_seconds,
            // a fresher fused value beats the one frozen into the last point
            heart_rate: snapshot.heart_rate.or_else(|| last.and_then(|p| p.heart_rate)),
            pace_seconds: last.and_then(|p| p.pace_seconds),
            average_pace_seconds: snapshot.average_pace_seconds,
            calories: snapshot.calories,
            current_point: last.map(|p| CurrentPoint {
                latitude: p.latitude,
                longitude: p.longitude,
                sequence: p.sequence + 1,
                t: p.elapsed_seconds,
                acc: p.accuracy,
            }),
            timestamp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{RoutePoint, SessionId};

    fn snapshot(last_point: Option<RoutePoint>) -> SessionSnapshot {
        SessionSnapshot {
            session_id: SessionId::from("s-9"),
            state: SessionState::Running,
            started_at_ms: 0,
            total_distance_meters: 412.5,
            duration_seconds: 130,
            calories: 31,
            point_count: last_point.as_ref().map_or(0, |p| p.sequence as usize + 1),
            last_point,
            average_pace_seconds: Some(315),
            heart_rate: None,
            stationary: false,
        }
    }

    #[test]
    fn test_payload_uses_one_based_sequence() {
        let point = RoutePoint {
            sequence: 41,
            latitude: 37.51,
            longitude: 127.02,
            altitude: None,
            accuracy: 6.0,
            elapsed_seconds: 129,
            heart_rate: Some(148),
            pace_seconds: Some(302),
            cumulative_distance_meters: 412.5,
        };
        let payload = TelemetryPayload::from_snapshot(&snapshot(Some(point)), "watch", 1_000);
        let current = payload.current_point.clone().unwrap();
        assert_eq!(current.sequence, 42);
        assert_eq!(current.t, 129);
        assert_eq!(payload.heart_rate, Some(148));
        assert_eq!(payload.pace_seconds, Some(302));

        let json: serde_json::Value = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["sessionId"], "s-9");
        assert_eq!(json["currentPoint"]["sequence"], 42);
        assert_eq!(json["state"], "running");
    }

    #[test]
    fn test_payload_without_points() {
        let payload = TelemetryPayload::from_snapshot(&snapshot(None), "watch", 1_000);
        assert!(payload.current_point.is_none());
        assert_eq!(payload.pace_seconds, None);
        assert_eq!(payload.average_pace_seconds, Some(315));
    }
}
