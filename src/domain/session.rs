//! Session data model: the live session, its immutable summary and snapshots

use crate::domain::types::{ActivityType, RoutePoint, SessionId};
use crate::services::distance::average_pace;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};

/// Get current epoch milliseconds
#[inline]
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Lifecycle state of the engine as seen from outside
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Running,
    Paused,
}

impl SessionState {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Running => "running",
            SessionState::Paused => "paused",
        }
    }
}

/// The live, mutable session. Owned exclusively by the engine.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: SessionId,
    pub activity_type: ActivityType,
    pub started_at_ms: u64,
    pub route_points: Vec<RoutePoint>,
    pub total_distance_meters: f64,
    pub duration_seconds: u32,
    pub calories: u32,
}

impl Session {
    pub fn new(session_id: SessionId, activity_type: ActivityType, started_at_ms: u64) -> Self {
        Self {
            session_id,
            activity_type,
            started_at_ms,
            route_points: Vec::with_capacity(1024),
            total_distance_meters: 0.0,
            duration_seconds: 0,
            calories: 0,
        }
    }

    /// Sequence number the next route point will get
    #[inline]
    pub fn next_sequence(&self) -> u32 {
        self.route_points.len() as u32
    }

    pub fn last_point(&self) -> Option<&RoutePoint> {
        self.route_points.last()
    }

    /// Consume the live session into its final summary
    pub fn into_summary(self, ended_at_ms: u64) -> SessionSummary {
        let (average_heart_rate, max_heart_rate) = heart_rate_stats(&self.route_points);
        let average_pace_seconds = average_pace(self.total_distance_meters, self.duration_seconds);
        SessionSummary {
            session_id: self.session_id,
            activity_type: self.activity_type,
            started_at_ms: self.started_at_ms,
            ended_at_ms,
            total_distance_meters: self.total_distance_meters,
            duration_seconds: self.duration_seconds,
            average_pace_seconds,
            calories: self.calories,
            average_heart_rate,
            max_heart_rate,
            route_points: self.route_points,
        }
    }
}

/// Average (truncated integer mean) and maximum heart rate over the route
pub fn heart_rate_stats(points: &[RoutePoint]) -> (Option<u32>, Option<u32>) {
    let mut sum: u64 = 0;
    let mut count: u64 = 0;
    let mut max: Option<u32> = None;
    for hr in points.iter().filter_map(|p| p.heart_rate) {
        sum += u64::from(hr);
        count += 1;
        max = Some(max.map_or(hr, |m| m.max(hr)));
    }
    if count == 0 {
        return (None, None);
    }
    (Some((sum / count) as u32), max)
}

/// Immutable result of a stopped session. Ownership passes to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub activity_type: ActivityType,
    pub started_at_ms: u64,
    pub ended_at_ms: u64,
    pub total_distance_meters: f64,
    pub duration_seconds: u32,
    pub average_pace_seconds: Option<u32>,
    pub calories: u32,
    pub average_heart_rate: Option<u32>,
    pub max_heart_rate: Option<u32>,
    pub route_points: Vec<RoutePoint>,
}

impl SessionSummary {
    /// Wire representation for the companion device.
    ///
    /// Distances go out as whole meters and sequences are 1-based.
    pub fn to_json(&self, device_id: &str) -> String {
        let started_at = DateTime::<Utc>::from_timestamp_millis(self.started_at_ms as i64)
            .map(|t| t.to_rfc3339());
        let points: Vec<serde_json::Value> = self
            .route_points
            .iter()
            .map(|p| {
                serde_json::json!({
                    "latitude": p.latitude,
                    "longitude": p.longitude,
                    "sequence": p.sequence + 1,
                    "timestampSeconds": p.elapsed_seconds,
                    "heartRate": p.heart_rate,
                    "paceSeconds": p.pace_seconds,
                    "altitude": p.altitude,
                    "accuracy": p.accuracy,
                    "cumulativeDistanceMeters": p.cumulative_distance_meters.round() as u64,
                })
            })
            .collect();

        serde_json::json!({
            "device": device_id,
            "sessionId": self.session_id.as_str(),
            "activityType": self.activity_type.as_str(),
            "startedAt": started_at,
            "endedAt": self.ended_at_ms,
            "distanceMeters": self.total_distance_meters.round() as u64,
            "durationSeconds": self.duration_seconds,
            "averagePaceSeconds": self.average_pace_seconds,
            "calories": self.calories,
            "averageHeartRate": self.average_heart_rate,
            "maxHeartRate": self.max_heart_rate,
            "routePoints": points,
        })
        .to_string()
    }
}

/// Point-in-time copy of the session for concurrent readers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub state: SessionState,
    pub started_at_ms: u64,
    pub total_distance_meters: f64,
    pub duration_seconds: u32,
    pub calories: u32,
    pub point_count: usize,
    pub last_point: Option<RoutePoint>,
    pub average_pace_seconds: Option<u32>,
    /// Latest fused heart rate, even if no route point carries it yet
    pub heart_rate: Option<u32>,
    /// Advisory stationary flag from the location window detector
    pub stationary: bool,
}
