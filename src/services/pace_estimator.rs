//! Instantaneous pace over the most recent 100 m of the route

use crate::domain::types::RoutePoint;
use crate::services::distance::{average_pace, instant_pace};

/// Length of the trailing segment used for instantaneous pace (meters)
const WINDOW_METERS: f64 = 100.0;
/// Below these totals an average pace is too unstable to report
const MIN_AVERAGE_DISTANCE_M: f64 = 10.0;
const MIN_AVERAGE_DURATION_S: u32 = 5;

/// Estimate pace for a point about to be appended.
///
/// `points` are the already-accepted route points (the new point excluded);
/// `total_distance` / `total_duration` are the values the new point will carry.
pub fn estimate(points: &[RoutePoint], total_distance: f64, total_duration: u32) -> Option<u32> {
    if total_distance < WINDOW_METERS {
        if total_distance < MIN_AVERAGE_DISTANCE_M || total_duration < MIN_AVERAGE_DURATION_S {
            return None;
        }
        return average_pace(total_distance, total_duration);
    }

    let target = total_distance - WINDOW_METERS;
    let start = points.iter().rev().find(|p| p.cumulative_distance_meters <= target)?;

    let recent_distance = total_distance - start.cumulative_distance_meters;
    if !(recent_distance > 0.0) || total_duration <= start.elapsed_seconds {
        return None;
    }
    instant_pace(recent_distance, total_duration - start.elapsed_seconds)
}
