//! Great-circle distance and pace arithmetic
//!
//! Pure functions, no state. Pace is always seconds per kilometer,
//! truncated to whole seconds.

/// Mean earth radius used by the haversine formula (meters)
const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Haversine distance between two coordinates in meters
pub fn haversine_meters(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_METERS * c
}

/// Average pace over a whole session, `None` when no distance was covered
pub fn average_pace(distance_meters: f64, duration_seconds: u32) -> Option<u32> {
    if !(distance_meters > 0.0) {
        return None;
    }
    Some((f64::from(duration_seconds) / (distance_meters / 1000.0)) as u32)
}

/// Pace over a recent segment.
///
/// Segments shorter than 10 m are too noisy to produce a pace.
pub fn instant_pace(recent_distance_meters: f64, recent_duration_seconds: u32) -> Option<u32> {
    if !(recent_distance_meters >= 10.0) {
        return None;
    }
    Some((f64::from(recent_duration_seconds) / (recent_distance_meters / 1000.0)) as u32)
}
