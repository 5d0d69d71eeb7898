//! Metrics fusion between GPS-derived values and platform-reported samples
//!
//! Source priority:
//! - distance: platform distance, once seen, replaces GPS accumulation for
//!   the rest of the session (sticky)
//! - pace: platform pace, then `1000 / platform speed`, then local estimate
//! - heart rate: latest value from either the sensor or the platform stream

use crate::domain::types::{HeartRateReading, LocationFix, MetricsSample};
use tracing::debug;

/// EMA weight for raw sensor heart rate
const HR_EMA_ALPHA: f64 = 0.3;
/// Minimum spacing between smoothed heart-rate emissions
const HR_EMIT_INTERVAL_MS: u64 = 1000;

/// Which platform-reported values the engine trusts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FusionPolicy {
    /// Platform distance/pace/speed take priority over GPS-derived values
    #[default]
    PlatformPreferred,
    /// Only heart rate is taken from the platform; distance and pace are GPS-only
    GpsOnly,
}

impl FusionPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FusionPolicy::PlatformPreferred => "platform_preferred",
            FusionPolicy::GpsOnly => "gps_only",
        }
    }
}

impl std::str::FromStr for FusionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "platform_preferred" => Ok(FusionPolicy::PlatformPreferred),
            "gps_only" => Ok(FusionPolicy::GpsOnly),
            other => Err(format!("unknown fusion policy '{other}'")),
        }
    }
}

/// Keep a value only if it is finite and strictly positive
#[inline]
fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

/// Transient per-session fusion values. Never persisted in route points.
#[derive(Debug, Clone, Default)]
pub struct FusionState {
    /// Last fix used as the origin for the next distance increment
    pub anchor: Option<LocationFix>,
    pub heart_rate: Option<u32>,
    pub platform_distance: Option<f64>,
    pub platform_pace: Option<u32>,
    pub platform_speed: Option<f64>,
    /// Set on the first platform distance; never cleared within a session
    pub platform_distance_priority: bool,
    pub paused: bool,
}

impl FusionState {
    /// Fold a platform sample into the state.
    ///
    /// Invalid fields are dropped individually; the rest still apply.
    /// Returns the number of fields that were accepted.
    pub fn apply_sample(&mut self, sample: &MetricsSample, policy: FusionPolicy) -> usize {
        let mut accepted = 0;

        if let Some(hr) = positive(sample.heart_rate) {
            self.heart_rate = Some(hr.round() as u32);
            accepted += 1;
        }

        if policy == FusionPolicy::GpsOnly {
            return accepted;
        }

        if let Some(distance) = positive(sample.distance_meters) {
            if !self.platform_distance_priority {
                debug!(distance = %distance, "platform_distance_priority_engaged");
            }
            self.platform_distance = Some(distance);
            self.platform_distance_priority = true;
            accepted += 1;
        }
        if let Some(pace) = positive(sample.pace_seconds_per_km) {
            self.platform_pace = Some(pace as u32);
            accepted += 1;
        }
        if let Some(speed) = positive(sample.speed_mps) {
            self.platform_speed = Some(speed);
            accepted += 1;
        }
        accepted
    }

    /// Pace from platform values, in priority order
    pub fn preferred_platform_pace(&self) -> Option<u32> {
        self.platform_pace
            .or_else(|| self.platform_speed.filter(|s| *s > 0.0).map(|s| (1000.0 / s) as u32))
    }
}

/// Exponential smoothing with a one-per-second emission limit for raw bpm
#[derive(Debug, Clone, Default)]
pub struct HeartRateSmoother {
    ema: Option<f64>,
    last_emit_ms: Option<u64>,
}

impl HeartRateSmoother {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw reading; returns a smoothed bpm when one is due.
    pub fn push(&mut self, reading: &HeartRateReading) -> Option<u32> {
        let raw = positive(Some(reading.bpm))?;
        let ema = match self.ema {
            None => raw,
            Some(prev) => HR_EMA_ALPHA * raw + (1.0 - HR_EMA_ALPHA) * prev,
        };
        self.ema = Some(ema);

        let due = self
            .last_emit_ms
            .map_or(true, |last| reading.timestamp_ms.saturating_sub(last) >= HR_EMIT_INTERVAL_MS);
        if !due {
            return None;
        }
        self.last_emit_ms = Some(reading.timestamp_ms);
        Some(ema.round() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hr(bpm: f64, t: u64) -> HeartRateReading {
        HeartRateReading { bpm, timestamp_ms: t }
    }

    #[test]
    fn test_platform_distance_priority_is_sticky() {
        let mut state = FusionState::default();
        assert!(!state.platform_distance_priority);

        state.apply_sample(
            &MetricsSample { distance_meters: Some(120.0), ..Default::default() },
            FusionPolicy::PlatformPreferred,
        );
        assert!(state.platform_distance_priority);

        // a sample without distance does not renegotiate priority
        state.apply_sample(
            &MetricsSample { heart_rate: Some(140.0), ..Default::default() },
            FusionPolicy::PlatformPreferred,
        );
        assert!(state.platform_distance_priority);
        assert_eq!(state.platform_distance, Some(120.0));
    }

    #[test]
    fn test_invalid_fields_dropped_individually() {
        let mut state = FusionState::default();
        let accepted = state.apply_sample(
            &MetricsSample {
                heart_rate: Some(f64::NAN),
                distance_meters: Some(0.0),
                speed_mps: Some(-1.0),
                pace_seconds_per_km: Some(330.0),
            },
            FusionPolicy::PlatformPreferred,
        );
        assert_eq!(accepted, 1);
        assert_eq!(state.heart_rate, None);
        assert!(!state.platform_distance_priority);
        assert_eq!(state.platform_pace, Some(330));
    }

    #[test]
    fn test_gps_only_policy_keeps_heart_rate() {
        let mut state = FusionState::default();
        state.apply_sample(
            &MetricsSample {
                heart_rate: Some(150.0),
                distance_meters: Some(500.0),
                speed_mps: Some(3.0),
                pace_seconds_per_km: None,
            },
            FusionPolicy::GpsOnly,
        );
        assert_eq!(state.heart_rate, Some(150));
        assert!(!state.platform_distance_priority);
        assert_eq!(state.preferred_platform_pace(), None);
    }

    #[test]
    fn test_pace_prefers_platform_pace_over_speed() {
        let mut state = FusionState { platform_speed: Some(4.0), ..Default::default() };
        assert_eq!(state.preferred_platform_pace(), Some(250));
        state.platform_pace = Some(300);
        assert_eq!(state.preferred_platform_pace(), Some(300));
    }

    #[test]
    fn test_smoother_rate_limits_and_smooths() {
        let mut smoother = HeartRateSmoother::new();
        assert_eq!(smoother.push(&hr(100.0, 0)), Some(100));
        // within the same second: absorbed into the average, not emitted
        assert_eq!(smoother.push(&hr(200.0, 400)), None);
        // ema = 0.3*200 + 0.7*100 = 130, then 0.3*130 + 0.7*130 = 130
        assert_eq!(smoother.push(&hr(130.0, 1_000)), Some(130));
    }

    #[test]
    fn test_smoother_ignores_non_positive() {
        let mut smoother = HeartRateSmoother::new();
        assert_eq!(smoother.push(&hr(0.0, 0)), None);
        assert_eq!(smoother.push(&hr(-5.0, 2_000)), None);
        assert_eq!(smoother.push(&hr(90.0, 4_000)), Some(90));
    }
}
