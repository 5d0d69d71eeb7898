//! GPS noise filtering
//!
//! Validates raw fixes, rejects dither, stationary jitter and speed spikes,
//! and shrinks accepted segments by a small noise allowance so GPS wobble
//! does not creep into the distance total.
//!
//! Also hosts the windowed stationary/resume detector. Its output is
//! advisory: it is reported in snapshots but never gates route points.

use crate::domain::types::LocationFix;
use crate::services::distance::haversine_meters;
use std::collections::VecDeque;
use tracing::trace;

/// Fixes with a larger accuracy radius are discarded (meters)
pub const DEFAULT_MAX_ACCURACY_M: f64 = 65.0;
/// Implied speeds above this are spikes (m/s)
pub const DEFAULT_MAX_SPEED_MPS: f64 = 6.5;
/// Effective segments below this are treated as no movement (meters)
const MIN_ACCUMULATE_DISTANCE_M: f64 = 0.5;
/// Reported speed below which a fix is a stationary candidate (m/s)
const STATIONARY_FIX_SPEED_MPS: f64 = 0.6;
/// Upper bound of the noise allowance subtracted from each segment (meters)
const MAX_NOISE_ALLOWANCE_M: f64 = 0.8;

/// Stationary window thresholds
const STATIONARY_WINDOW_MIN_SECS: f64 = 4.0;
const STATIONARY_SPEED_MPS: f64 = 0.5;
const STATIONARY_DISTANCE_M: f64 = 3.0;
const RESUME_SPEED_MPS: f64 = 0.7;
const RESUME_DISTANCE_M: f64 = 6.0;

/// Why a fix was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    InvalidCoordinate,
    LowAccuracy,
    BelowMinMove,
    StationaryJitter,
    SpeedSpike,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::InvalidCoordinate => "invalid_coordinate",
            RejectReason::LowAccuracy => "low_accuracy",
            RejectReason::BelowMinMove => "below_min_move",
            RejectReason::StationaryJitter => "stationary_jitter",
            RejectReason::SpeedSpike => "speed_spike",
        }
    }
}

/// Outcome of running a fix through the filter
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FilterVerdict {
    /// Accepted; carries the raw great-circle distance to the previous fix
    Accept { raw_distance: f64 },
    Reject(RejectReason),
}

impl FilterVerdict {
    #[inline]
    pub fn is_rejected(&self) -> bool {
        matches!(self, FilterVerdict::Reject(_))
    }
}

/// Coordinate sanity: finite, in range, and not the (0, 0) null island
pub fn is_valid_coordinate(fix: &LocationFix) -> bool {
    let (lat, lon) = (fix.latitude, fix.longitude);
    lat.is_finite()
        && lon.is_finite()
        && lat.abs() <= 90.0
        && lon.abs() <= 180.0
        && !(lat == 0.0 && lon == 0.0)
}

/// `clamp(accuracy × 0.3, 1.5, 3.0)`
#[inline]
pub fn min_move_threshold(accuracy: f64) -> f64 {
    (accuracy * 0.3).clamp(1.5, 3.0)
}

/// `clamp(accuracy × 0.5, 2.0, 4.0)`
#[inline]
pub fn stationary_jitter_threshold(accuracy: f64) -> f64 {
    (accuracy * 0.5).clamp(2.0, 4.0)
}

/// Raw segment minus the noise allowance; sub-0.5 m results count as zero
pub fn effective_distance(raw_distance: f64, prev_accuracy: f64, current_accuracy: f64) -> f64 {
    let avg_accuracy = (prev_accuracy + current_accuracy) / 2.0;
    let allowance = MAX_NOISE_ALLOWANCE_M.min(avg_accuracy * 0.05).min(raw_distance * 0.1);
    let effective = (raw_distance - allowance).max(0.0);
    if effective >= MIN_ACCUMULATE_DISTANCE_M {
        effective
    } else {
        0.0
    }
}

/// Per-fix validation rules
#[derive(Debug, Clone, Copy)]
pub struct LocationFilter {
    max_accuracy_m: f64,
    max_speed_mps: f64,
}

impl Default for LocationFilter {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ACCURACY_M, DEFAULT_MAX_SPEED_MPS)
    }
}

impl LocationFilter {
    pub fn new(max_accuracy_m: f64, max_speed_mps: f64) -> Self {
        Self { max_accuracy_m, max_speed_mps }
    }

    /// Rules that apply to a fix on its own (validity and accuracy)
    pub fn check_standalone(&self, fix: &LocationFix) -> Option<RejectReason> {
        if !is_valid_coordinate(fix) {
            return Some(RejectReason::InvalidCoordinate);
        }
        if !(fix.accuracy <= self.max_accuracy_m) {
            return Some(RejectReason::LowAccuracy);
        }
        None
    }

    /// Apply all rules in order. The first fix of a session only needs
    /// to pass the standalone rules.
    pub fn evaluate(&self, previous: Option<&LocationFix>, current: &LocationFix) -> FilterVerdict {
        if let Some(reason) = self.check_standalone(current) {
            return FilterVerdict::Reject(reason);
        }
        let Some(prev) = previous else {
            return FilterVerdict::Accept { raw_distance: 0.0 };
        };

        let raw = haversine_meters(prev.latitude, prev.longitude, current.latitude, current.longitude);

        if raw < min_move_threshold(current.accuracy) {
            return FilterVerdict::Reject(RejectReason::BelowMinMove);
        }

        if let Some(speed) = current.speed {
            if (0.0..STATIONARY_FIX_SPEED_MPS).contains(&speed)
                && raw < stationary_jitter_threshold(current.accuracy)
            {
                return FilterVerdict::Reject(RejectReason::StationaryJitter);
            }
        }

        if current.timestamp_ms <= prev.timestamp_ms {
            return FilterVerdict::Reject(RejectReason::SpeedSpike);
        }
        let dt_secs = (current.timestamp_ms - prev.timestamp_ms) as f64 / 1000.0;
        let implied_speed = raw / dt_secs;
        if implied_speed > self.max_speed_mps {
            trace!(implied_speed = %implied_speed, raw = %raw, dt_secs = %dt_secs, "fix_speed_spike");
            return FilterVerdict::Reject(RejectReason::SpeedSpike);
        }

        FilterVerdict::Accept { raw_distance: raw }
    }

    /// Boolean form of [`evaluate`](Self::evaluate)
    pub fn should_ignore(&self, previous: Option<&LocationFix>, current: &LocationFix) -> bool {
        self.evaluate(previous, current).is_rejected()
    }
}

/// Window measurements from the stationary detector
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StationaryState {
    pub is_stationary: bool,
    pub window_speed: f64,
    pub window_distance: f64,
}

/// Rolling-window detector for standing still and moving off again
pub struct StationaryDetector {
    window: VecDeque<LocationFix>,
    window_ms: u64,
    stationary: bool,
}

impl StationaryDetector {
    pub fn new(window_secs: u64) -> Self {
        let window_ms = window_secs.max(STATIONARY_WINDOW_MIN_SECS as u64) * 1000;
        Self { window: VecDeque::with_capacity(16), window_ms, stationary: false }
    }

    pub fn is_stationary(&self) -> bool {
        self.stationary
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.stationary = false;
    }

    /// Measure displacement and average speed across the current window
    pub fn measure(&self) -> StationaryState {
        let (Some(first), Some(last)) = (self.window.front(), self.window.back()) else {
            return StationaryState { is_stationary: false, window_speed: 0.0, window_distance: 0.0 };
        };
        if self.window.len() < 2 {
            return StationaryState { is_stationary: false, window_speed: 0.0, window_distance: 0.0 };
        }
        let duration_secs = last.timestamp_ms.saturating_sub(first.timestamp_ms) as f64 / 1000.0;
        let distance = haversine_meters(first.latitude, first.longitude, last.latitude, last.longitude);
        let speed = if duration_secs > 0.0 { distance / duration_secs } else { 0.0 };
        let is_stationary = duration_secs >= STATIONARY_WINDOW_MIN_SECS
            && speed < STATIONARY_SPEED_MPS
            && distance < STATIONARY_DISTANCE_M;
        StationaryState { is_stationary, window_speed: speed, window_distance: distance }
    }

    /// Push a fix and update the stationary flag.
    ///
    /// Returns `Some(new_flag)` when the flag flips.
    pub fn push(&mut self, fix: LocationFix) -> Option<bool> {
        if let Some(last) = self.window.back() {
            if fix.timestamp_ms < last.timestamp_ms {
                // late fix, window stays time-ordered
                return None;
            }
        }
        self.window.push_back(fix);
        let cutoff = fix.timestamp_ms.saturating_sub(self.window_ms);
        while self.window.front().is_some_and(|f| f.timestamp_ms < cutoff) {
            self.window.pop_front();
        }

        let state = self.measure();
        let next = if self.stationary {
            !should_resume(&state, fix.speed)
        } else {
            state.is_stationary
        };
        if next != self.stationary {
            self.stationary = next;
            return Some(next);
        }
        None
    }
}

/// Resume from stationary on window speed, window displacement, or current speed
pub fn should_resume(state: &StationaryState, current_speed: Option<f64>) -> bool {
    state.window_speed > RESUME_SPEED_MPS
        || state.window_distance > RESUME_DISTANCE_M
        || current_speed.is_some_and(|s| s > RESUME_SPEED_MPS)
}
