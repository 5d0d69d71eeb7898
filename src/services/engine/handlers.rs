//! Sensor event handlers for the SessionEngine
//!
//! Each handler folds one incoming sample into the live session. Handlers
//! never fail: samples that arrive while idle or that the noise filter
//! rejects are dropped and counted.

use super::SessionEngine;
use crate::domain::types::{HeartRateReading, LocationFix, MetricsSample, RoutePoint};
use crate::services::location_filter::{effective_distance, FilterVerdict, RejectReason};
use crate::services::pace_estimator;
use tracing::{debug, info, trace};

/// What happened to a location fix
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LocationOutcome {
    /// No session
    Idle,
    /// Paused; the fix became the new anchor
    AnchorRefreshed,
    /// Paused and the fix failed validity or accuracy
    PausedDropped(RejectReason),
    /// Running and the noise filter dropped the fix
    Rejected(RejectReason),
    /// A route point with this sequence was appended
    Appended(u32),
}

impl SessionEngine {
    /// Handle a location fix from the location source
    pub fn on_location(&mut self, fix: LocationFix) -> LocationOutcome {
        if self.session.is_none() {
            return LocationOutcome::Idle;
        }
        self.metrics.record_fix_received();

        if self.fusion.paused {
            self.metrics.record_fix_ignored_paused();
            if let Some(reason) = self.filter.check_standalone(&fix) {
                trace!(reason = %reason.as_str(), "paused_fix_dropped");
                return LocationOutcome::PausedDropped(reason);
            }
            self.fusion.anchor = Some(fix);
            return LocationOutcome::AnchorRefreshed;
        }

        let raw_distance = match self.filter.evaluate(self.fusion.anchor.as_ref(), &fix) {
            FilterVerdict::Accept { raw_distance } => raw_distance,
            FilterVerdict::Reject(reason) => {
                self.metrics.record_fix_rejected(reason);
                // dither is still evidence of standing still
                if reason == RejectReason::BelowMinMove || reason == RejectReason::StationaryJitter
                {
                    self.track_stationary(fix);
                }
                debug!(
                    reason = %reason.as_str(),
                    accuracy = %fix.accuracy,
                    "fix_rejected"
                );
                return LocationOutcome::Rejected(reason);
            }
        };
        self.metrics.record_fix_accepted();
        self.track_stationary(fix);

        let sequence = self.append_point(&fix, raw_distance);
        self.fusion.anchor = Some(fix);
        LocationOutcome::Appended(sequence)
    }

    /// Handle a fused sample from the platform exercise session.
    ///
    /// Applies regardless of pause and never creates route points.
    pub fn on_metrics_sample(&mut self, sample: MetricsSample) -> usize {
        if self.session.is_none() {
            return 0;
        }
        self.metrics.record_metrics_sample();
        let accepted = self.fusion.apply_sample(&sample, self.fusion_policy);
        self.apply_platform_distance();
        trace!(
            accepted = %accepted,
            heart_rate = ?sample.heart_rate,
            distance = ?sample.distance_meters,
            "metrics_sample"
        );
        accepted
    }

    /// Fold a prioritized platform distance into the totals right away so live
    /// telemetry keeps moving during GPS dropouts
    fn apply_platform_distance(&mut self) {
        if !self.fusion.platform_distance_priority {
            return;
        }
        let Some(platform) = self.fusion.platform_distance else {
            return;
        };
        let weight_kg = self.weight.weight_kg();
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if platform > session.total_distance_meters {
            session.total_distance_meters = platform;
            session.calories =
                self.calorie_model.calories(platform, session.duration_seconds, weight_kg);
        }
    }

    /// Handle a raw bpm reading from the heart-rate sensor
    pub fn on_heart_rate(&mut self, reading: HeartRateReading) -> Option<u32> {
        if self.session.is_none() {
            return None;
        }
        self.metrics.record_heart_rate_reading();
        let bpm = self.hr_smoother.push(&reading)?;
        self.fusion.heart_rate = Some(bpm);
        Some(bpm)
    }

    /// Append a route point for an accepted fix and refresh the derived totals
    fn append_point(&mut self, fix: &LocationFix, raw_distance: f64) -> u32 {
        let now_ms = self.clock.now_ms();
        let weight_kg = self.weight.weight_kg();
        let fusion = &self.fusion;
        let Some(session) = self.session.as_mut() else {
            return 0;
        };

        let total_distance = if fusion.platform_distance_priority {
            let platform = fusion.platform_distance.unwrap_or(0.0);
            session.total_distance_meters.max(platform)
        } else {
            let increment = match fusion.anchor.as_ref() {
                Some(prev) => effective_distance(raw_distance, prev.accuracy, fix.accuracy),
                None => 0.0,
            };
            session.total_distance_meters + increment
        };

        let duration = (now_ms.saturating_sub(session.started_at_ms) / 1000) as u32;

        let pace = fusion.preferred_platform_pace().or_else(|| {
            pace_estimator::estimate(&session.route_points, total_distance, duration)
        });

        let sequence = session.next_sequence();
        session.route_points.push(RoutePoint {
            sequence,
            latitude: fix.latitude,
            longitude: fix.longitude,
            altitude: fix.altitude,
            accuracy: fix.accuracy,
            elapsed_seconds: duration,
            heart_rate: fusion.heart_rate,
            pace_seconds: pace,
            cumulative_distance_meters: total_distance,
        });
        session.total_distance_meters = total_distance;
        session.duration_seconds = duration;
        session.calories = self.calorie_model.calories(total_distance, duration, weight_kg);
        self.metrics.record_point_appended();

        trace!(
            sequence = %sequence,
            distance_m = format!("{:.1}", total_distance),
            elapsed_s = %duration,
            pace = ?pace,
            hr = ?fusion.heart_rate,
            "route_point_appended"
        );
        sequence
    }

    fn track_stationary(&mut self, fix: LocationFix) {
        if let Some(stationary) = self.stationary.push(fix) {
            let state = self.stationary.measure();
            if stationary {
                info!(
                    window_speed = format!("{:.2}", state.window_speed),
                    window_distance = format!("{:.1}", state.window_distance),
                    "stationary_detected"
                );
            } else {
                info!(
                    window_speed = format!("{:.2}", state.window_speed),
                    window_distance = format!("{:.1}", state.window_distance),
                    "movement_resumed"
                );
            }
        }
    }
}
