//! Wall-clock source for session timing
//!
//! The engine never reads the system time directly so tests can drive
//! elapsed seconds deterministically.

use crate::domain::session::epoch_ms;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::time::Instant;

pub trait Clock: Send + Sync {
    /// Current time in epoch milliseconds
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn now_ms(&self) -> u64 {
        epoch_ms()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self { now_ms: AtomicU64::new(start_ms) }
    }

    pub fn set_ms(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::Relaxed);
    }

    pub fn advance_ms(&self, delta_ms: u64) {
        self.now_ms.fetch_add(delta_ms, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::Relaxed)
    }
}

/// Clock for replayed runs: time since creation passes `speed_factor` times
/// faster, so session durations match the recording rather than the replay.
///
/// Follows the tokio clock, which lets paused-time tests replay a run.
#[derive(Debug, Clone, Copy)]
pub struct ScaledClock {
    base_ms: u64,
    origin: Instant,
    speed_factor: f64,
}

impl ScaledClock {
    pub fn new(speed_factor: f64) -> Self {
        Self::starting_at(epoch_ms(), speed_factor)
    }

    pub fn starting_at(base_ms: u64, speed_factor: f64) -> Self {
        let speed_factor =
            if speed_factor.is_finite() && speed_factor > 0.0 { speed_factor } else { 1.0 };
        Self { base_ms, origin: Instant::now(), speed_factor }
    }
}

impl Clock for ScaledClock {
    fn now_ms(&self) -> u64 {
        let scaled = self.origin.elapsed().as_millis() as f64 * self.speed_factor;
        self.base_ms + scaled as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advances() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ms(), 1_000);
        clock.advance_ms(2_500);
        assert_eq!(clock.now_ms(), 3_500);
        clock.set_ms(10);
        assert_eq!(clock.now_ms(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scaled_clock_runs_faster() {
        let clock = ScaledClock::starting_at(1_000, 4.0);
        assert_eq!(clock.now_ms(), 1_000);
        tokio::time::sleep(std::time::Duration::from_millis(2_500)).await;
        assert_eq!(clock.now_ms(), 11_000);
    }

    #[test]
    fn test_scaled_clock_rejects_bad_factor() {
        let clock = ScaledClock::starting_at(0, f64::NAN);
        assert_eq!(clock.speed_factor, 1.0);
        assert_eq!(ScaledClock::starting_at(0, -2.0).speed_factor, 1.0);
    }

    #[test]
    fn test_system_clock_is_epoch() {
        // anything after 2020-01-01
        assert!(SystemClock.now_ms() > 1_577_836_800_000);
    }
}
