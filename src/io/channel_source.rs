//! Sources backed by pre-built channels
//!
//! Used to embed the engine in another process or to drive it from tests.
//! Each source hands out its receiver once; a second subscription reports
//! the sensor as unavailable.

use crate::domain::types::{ActivityType, HeartRateReading, LocationFix, MetricsSample};
use crate::io::sources::{ExerciseSession, HeartRateSource, LocationSource, SensorError};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::mpsc;

pub struct ChannelSource<T> {
    rx: Mutex<Option<mpsc::Receiver<T>>>,
}

impl<T> ChannelSource<T> {
    /// Create the source and the sender that feeds it
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<T>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::from_receiver(rx), tx)
    }

    pub fn from_receiver(rx: mpsc::Receiver<T>) -> Self {
        Self { rx: Mutex::new(Some(rx)) }
    }

    fn take(&self, name: &str) -> Result<mpsc::Receiver<T>, SensorError> {
        self.rx
            .lock()
            .take()
            .ok_or_else(|| SensorError::Unavailable(format!("{name} channel already subscribed")))
    }
}

#[async_trait]
impl LocationSource for ChannelSource<LocationFix> {
    async fn subscribe(&self) -> Result<mpsc::Receiver<LocationFix>, SensorError> {
        self.take("location")
    }
}

#[async_trait]
impl HeartRateSource for ChannelSource<HeartRateReading> {
    async fn subscribe(&self) -> Result<mpsc::Receiver<HeartRateReading>, SensorError> {
        self.take("heart_rate")
    }
}

/// Exercise session whose samples come from a channel.
///
/// `starts`/`stops` count calls, failed ones included. Start and stop can be
/// switched to fail, standing in for a platform that refuses the request.
pub struct ChannelExercise {
    samples: ChannelSource<MetricsSample>,
    starts: AtomicU32,
    stops: AtomicU32,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
}

impl ChannelExercise {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<MetricsSample>) {
        let (samples, tx) = ChannelSource::new(buffer);
        let exercise = Self {
            samples,
            starts: AtomicU32::new(0),
            stops: AtomicU32::new(0),
            fail_start: AtomicBool::new(false),
            fail_stop: AtomicBool::new(false),
        };
        (exercise, tx)
    }

    pub fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::Relaxed);
    }

    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::Relaxed)
    }

    pub fn stops(&self) -> u32 {
        self.stops.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ExerciseSession for ChannelExercise {
    async fn start(&self, activity: &ActivityType) -> Result<(), SensorError> {
        self.starts.fetch_add(1, Ordering::Relaxed);
        if self.fail_start.load(Ordering::Relaxed) {
            return Err(SensorError::Unavailable(format!(
                "exercise start refused for {}",
                activity.as_str()
            )));
        }
        Ok(())
    }

    async fn stop(&self) -> Result<(), SensorError> {
        self.stops.fetch_add(1, Ordering::Relaxed);
        if self.fail_stop.load(Ordering::Relaxed) {
            return Err(SensorError::Unavailable("exercise stop refused".to_string()));
        }
        Ok(())
    }

    async fn metrics_stream(&self) -> Result<mpsc::Receiver<MetricsSample>, SensorError> {
        self.samples.take("exercise")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_single_subscription() {
        let (source, tx) = ChannelSource::<LocationFix>::new(4);
        let mut rx = LocationSource::subscribe(&source).await.unwrap();
        tx.send(LocationFix::new(37.5, 127.0, 5.0, 1)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().timestamp_ms, 1);

        let again = LocationSource::subscribe(&source).await;
        assert!(matches!(again, Err(SensorError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_exercise_counts_lifecycle() {
        let (exercise, _tx) = ChannelExercise::new(4);
        exercise.start(&ActivityType::Running).await.unwrap();
        exercise.stop().await.unwrap();
        assert_eq!((exercise.starts(), exercise.stops()), (1, 1));
        assert!(exercise.metrics_stream().await.is_ok());
    }

    #[tokio::test]
    async fn test_exercise_failures_still_counted() {
        let (exercise, _tx) = ChannelExercise::new(4);
        exercise.set_fail_start(true);
        exercise.set_fail_stop(true);
        assert!(exercise.start(&ActivityType::Running).await.is_err());
        assert!(exercise.stop().await.is_err());
        assert_eq!((exercise.starts(), exercise.stops()), (1, 1));
    }
}
