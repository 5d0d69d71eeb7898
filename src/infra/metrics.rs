//! Lock-free metrics collection for the run tracker
//!
//! Counters are plain atomics updated from the hot path with `Relaxed`
//! ordering. A periodic reporter calls [`Metrics::report`] which reads the
//! monotonic totals and swaps the per-interval counters back to zero.

use crate::services::location_filter::RejectReason;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Number of distinct fix rejection reasons
const REJECT_REASONS: usize = 5;

#[inline]
fn reject_index(reason: RejectReason) -> usize {
    match reason {
        RejectReason::InvalidCoordinate => 0,
        RejectReason::LowAccuracy => 1,
        RejectReason::BelowMinMove => 2,
        RejectReason::StationaryJitter => 3,
        RejectReason::SpeedSpike => 4,
    }
}

const REJECT_ORDER: [RejectReason; REJECT_REASONS] = [
    RejectReason::InvalidCoordinate,
    RejectReason::LowAccuracy,
    RejectReason::BelowMinMove,
    RejectReason::StationaryJitter,
    RejectReason::SpeedSpike,
];

pub struct Metrics {
    fixes_received: AtomicU64,
    fixes_accepted: AtomicU64,
    fixes_rejected: [AtomicU64; REJECT_REASONS],
    fixes_ignored_paused: AtomicU64,
    /// Fixes since last report, for the rate
    fixes_since_report: AtomicU64,
    metrics_samples: AtomicU64,
    heart_rate_readings: AtomicU64,
    points_appended: AtomicU64,
    publish_ok: AtomicU64,
    publish_failed: AtomicU64,
    events_dropped: AtomicU64,
    sessions_started: AtomicU64,
    sessions_completed: AtomicU64,
    last_report_time: Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            fixes_received: AtomicU64::new(0),
            fixes_accepted: AtomicU64::new(0),
            fixes_rejected: std::array::from_fn(|_| AtomicU64::new(0)),
            fixes_ignored_paused: AtomicU64::new(0),
            fixes_since_report: AtomicU64::new(0),
            metrics_samples: AtomicU64::new(0),
            heart_rate_readings: AtomicU64::new(0),
            points_appended: AtomicU64::new(0),
            publish_ok: AtomicU64::new(0),
            publish_failed: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            sessions_started: AtomicU64::new(0),
            sessions_completed: AtomicU64::new(0),
            last_report_time: Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_fix_received(&self) {
        self.fixes_received.fetch_add(1, Ordering::Relaxed);
        self.fixes_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_accepted(&self) {
        self.fixes_accepted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fix_rejected(&self, reason: RejectReason) {
        self.fixes_rejected[reject_index(reason)].fetch_add(1, Ordering::Relaxed);
    }

    /// Fix that arrived while the session was paused
    #[inline]
    pub fn record_fix_ignored_paused(&self) {
        self.fixes_ignored_paused.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_metrics_sample(&self) {
        self.metrics_samples.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heart_rate_reading(&self) {
        self.heart_rate_readings.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_point_appended(&self) {
        self.points_appended.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_publish(&self, ok: bool) {
        if ok {
            self.publish_ok.fetch_add(1, Ordering::Relaxed);
        } else {
            self.publish_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sensor event dropped because the engine queue was full
    #[inline]
    pub fn record_event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_session_completed(&self) {
        self.sessions_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fixes_received(&self) -> u64 {
        self.fixes_received.load(Ordering::Relaxed)
    }

    pub fn fixes_accepted(&self) -> u64 {
        self.fixes_accepted.load(Ordering::Relaxed)
    }

    pub fn fixes_rejected(&self, reason: RejectReason) -> u64 {
        self.fixes_rejected[reject_index(reason)].load(Ordering::Relaxed)
    }

    pub fn fixes_rejected_total(&self) -> u64 {
        self.fixes_rejected.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }

    pub fn fixes_ignored_paused(&self) -> u64 {
        self.fixes_ignored_paused.load(Ordering::Relaxed)
    }

    pub fn points_appended(&self) -> u64 {
        self.points_appended.load(Ordering::Relaxed)
    }

    pub fn publish_ok(&self) -> u64 {
        self.publish_ok.load(Ordering::Relaxed)
    }

    pub fn publish_failed(&self) -> u64 {
        self.publish_failed.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    /// Build a summary and reset the per-interval counters
    pub fn report(&self) -> MetricsSummary {
        let fixes_count = self.fixes_since_report.swap(0, Ordering::Relaxed);

        let elapsed = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed();
            *last = Instant::now();
            elapsed
        };
        let fixes_per_sec = if elapsed.as_secs_f64() > 0.0 {
            fixes_count as f64 / elapsed.as_secs_f64()
        } else {
            0.0
        };

        let rejected = REJECT_ORDER.map(|reason| (reason, self.fixes_rejected(reason)));

        MetricsSummary {
            fixes_received: self.fixes_received(),
            fixes_accepted: self.fixes_accepted(),
            fixes_rejected: rejected,
            fixes_ignored_paused: self.fixes_ignored_paused(),
            fixes_per_sec,
            metrics_samples: self.metrics_samples.load(Ordering::Relaxed),
            heart_rate_readings: self.heart_rate_readings.load(Ordering::Relaxed),
            points_appended: self.points_appended(),
            publish_ok: self.publish_ok(),
            publish_failed: self.publish_failed(),
            events_dropped: self.events_dropped(),
            sessions_started: self.sessions_started.load(Ordering::Relaxed),
            sessions_completed: self.sessions_completed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone)]
pub struct MetricsSummary {
    pub fixes_received: u64,
    pub fixes_accepted: u64,
    pub fixes_rejected: [(RejectReason, u64); REJECT_REASONS],
    pub fixes_ignored_paused: u64,
    pub fixes_per_sec: f64,
    pub metrics_samples: u64,
    pub heart_rate_readings: u64,
    pub points_appended: u64,
    pub publish_ok: u64,
    pub publish_failed: u64,
    pub events_dropped: u64,
    pub sessions_started: u64,
    pub sessions_completed: u64,
}

impl MetricsSummary {
    pub fn rejected_total(&self) -> u64 {
        self.fixes_rejected.iter().map(|(_, n)| n).sum()
    }

    pub fn log(&self) {
        let rejected = self
            .fixes_rejected
            .iter()
            .filter(|(_, n)| *n > 0)
            .map(|(reason, n)| format!("{}={}", reason.as_str(), n))
            .collect::<Vec<_>>()
            .join(",");

        info!(
            fixes = %self.fixes_received,
            fixes_per_sec = format!("{:.2}", self.fixes_per_sec),
            accepted = %self.fixes_accepted,
            rejected = %self.rejected_total(),
            rejected_by_reason = %rejected,
            ignored_paused = %self.fixes_ignored_paused,
            samples = %self.metrics_samples,
            hr_readings = %self.heart_rate_readings,
            points = %self.points_appended,
            publish_ok = %self.publish_ok,
            publish_failed = %self.publish_failed,
            dropped = %self.events_dropped,
            sessions = %self.sessions_started,
            completed = %self.sessions_completed,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_new() {
        let metrics = Metrics::new();
        assert_eq!(metrics.fixes_received(), 0);
        assert_eq!(metrics.fixes_rejected_total(), 0);
    }

    #[test]
    fn test_rejections_counted_per_reason() {
        let metrics = Metrics::new();
        metrics.record_fix_rejected(RejectReason::SpeedSpike);
        metrics.record_fix_rejected(RejectReason::SpeedSpike);
        metrics.record_fix_rejected(RejectReason::LowAccuracy);

        assert_eq!(metrics.fixes_rejected(RejectReason::SpeedSpike), 2);
        assert_eq!(metrics.fixes_rejected(RejectReason::LowAccuracy), 1);
        assert_eq!(metrics.fixes_rejected(RejectReason::BelowMinMove), 0);
        assert_eq!(metrics.fixes_rejected_total(), 3);
    }

    #[test]
    fn test_publish_outcomes() {
        let metrics = Metrics::new();
        metrics.record_publish(true);
        metrics.record_publish(false);
        metrics.record_publish(true);
        assert_eq!(metrics.publish_ok(), 2);
        assert_eq!(metrics.publish_failed(), 1);
    }

    #[test]
    fn test_report_keeps_totals_and_resets_rate() {
        let metrics = Metrics::new();
        metrics.record_fix_received();
        metrics.record_fix_received();

        let first = metrics.report();
        assert_eq!(first.fixes_received, 2);

        let second = metrics.report();
        assert_eq!(second.fixes_received, 2);
        assert_eq!(second.fixes_per_sec, 0.0);
    }
}
