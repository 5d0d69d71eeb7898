//! Replay of a recorded run as live sources
//!
//! A recording is a JSONL file, one record per line:
//! ```text
//! {"kind":"fix","at_ms":0,"latitude":37.5,"longitude":127.0,"accuracy":5.0,"speed":2.9}
//! {"kind":"metrics","at_ms":1000,"heart_rate":141,"distance_meters":3.1}
//! {"kind":"hr","at_ms":1200,"bpm":142}
//! ```
//! `at_ms` is the offset from the start of the recording. Each subscription
//! re-reads the file and replays its records paced by those offsets divided
//! by the speed factor. Fix timestamps keep the recorded spacing so the
//! noise filter sees real-world speeds at any replay speed; pair the replay
//! with a [`ScaledClock`](crate::infra::clock::ScaledClock) of the same
//! factor so session durations do too.

use crate::domain::session::epoch_ms;
use crate::domain::types::{ActivityType, HeartRateReading, LocationFix, MetricsSample};
use crate::io::sources::{ExerciseSession, HeartRateSource, LocationSource, SensorError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

const REPLAY_CHANNEL_SIZE: usize = 256;

/// One line of a recording
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReplayRecord {
    Fix {
        at_ms: u64,
        latitude: f64,
        longitude: f64,
        accuracy: f64,
        #[serde(default)]
        altitude: Option<f64>,
        #[serde(default)]
        speed: Option<f64>,
    },
    Metrics {
        at_ms: u64,
        #[serde(flatten)]
        sample: MetricsSample,
    },
    Hr {
        at_ms: u64,
        bpm: f64,
    },
}

impl ReplayRecord {
    pub fn at_ms(&self) -> u64 {
        match self {
            ReplayRecord::Fix { at_ms, .. }
            | ReplayRecord::Metrics { at_ms, .. }
            | ReplayRecord::Hr { at_ms, .. } => *at_ms,
        }
    }
}

/// Parse a recording, skipping lines that do not parse
pub fn parse_records(content: &str) -> Vec<ReplayRecord> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(idx, line)| match serde_json::from_str::<ReplayRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(line = %(idx + 1), error = %e, "replay_line_invalid");
                None
            }
        })
        .collect()
}

/// A recorded run served as location, heart-rate and exercise sources
#[derive(Debug, Clone)]
pub struct ReplayFile {
    path: PathBuf,
    speed_factor: f64,
}

impl ReplayFile {
    pub fn new(path: impl AsRef<Path>, speed_factor: f64) -> Self {
        let speed_factor = if speed_factor.is_finite() && speed_factor > 0.0 { speed_factor } else { 1.0 };
        Self { path: path.as_ref().to_path_buf(), speed_factor }
    }

    /// Effective speed factor after sanitizing
    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    async fn load(&self) -> Result<Vec<ReplayRecord>, SensorError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SensorError::Unavailable(format!("replay file {}: {e}", self.path.display()))
        })?;
        Ok(parse_records(&content))
    }

    /// Spawn a task that emits the selected records on schedule
    async fn spawn_stream<T, F>(&self, kind: &'static str, select: F) -> Result<mpsc::Receiver<T>, SensorError>
    where
        T: Send + 'static,
        F: Fn(&ReplayRecord, u64) -> Option<T> + Send + 'static,
    {
        let records = self.load().await?;
        let (tx, rx) = mpsc::channel(REPLAY_CHANNEL_SIZE);
        let speed_factor = self.speed_factor;
        let base_ms = epoch_ms();
        let started = Instant::now();

        let total = records.len();
        tokio::spawn(async move {
            let mut sent = 0usize;
            for record in records {
                let Some(item) = select(&record, base_ms) else {
                    continue;
                };
                let offset = Duration::from_secs_f64(record.at_ms() as f64 / 1000.0 / speed_factor);
                sleep_until(started + offset).await;
                if tx.send(item).await.is_err() {
                    debug!(source = %kind, sent = %sent, "replay_stream_cancelled");
                    return;
                }
                sent += 1;
            }
            debug!(source = %kind, sent = %sent, "replay_stream_finished");
        });
        debug!(source = %kind, records = %total, "replay_stream_started");
        Ok(rx)
    }
}

fn to_fix(record: &ReplayRecord, base_ms: u64) -> Option<LocationFix> {
    match *record {
        ReplayRecord::Fix { at_ms, latitude, longitude, accuracy, altitude, speed } => {
            Some(LocationFix {
                latitude,
                longitude,
                altitude,
                accuracy,
                speed,
                timestamp_ms: base_ms + at_ms,
            })
        }
        _ => None,
    }
}

fn to_heart_rate(record: &ReplayRecord, base_ms: u64) -> Option<HeartRateReading> {
    match *record {
        ReplayRecord::Hr { at_ms, bpm } => Some(HeartRateReading { bpm, timestamp_ms: base_ms + at_ms }),
        _ => None,
    }
}

fn to_sample(record: &ReplayRecord, _base_ms: u64) -> Option<MetricsSample> {
    match *record {
        ReplayRecord::Metrics { sample, .. } => Some(sample),
        _ => None,
    }
}

#[async_trait]
impl LocationSource for ReplayFile {
    async fn subscribe(&self) -> Result<mpsc::Receiver<LocationFix>, SensorError> {
        self.spawn_stream("location", to_fix).await
    }
}

#[async_trait]
impl HeartRateSource for ReplayFile {
    async fn subscribe(&self) -> Result<mpsc::Receiver<HeartRateReading>, SensorError> {
        self.spawn_stream("heart_rate", to_heart_rate).await
    }
}

#[async_trait]
impl ExerciseSession for ReplayFile {
    async fn start(&self, activity: &ActivityType) -> Result<(), SensorError> {
        info!(
            file = %self.path.display(),
            speed_factor = %self.speed_factor,
            activity = %activity.as_str(),
            "replay_exercise_started"
        );
        Ok(())
    }

    async fn stop(&self) -> Result<(), SensorError> {
        info!(file = %self.path.display(), "replay_exercise_stopped");
        Ok(())
    }

    async fn metrics_stream(&self) -> Result<mpsc::Receiver<MetricsSample>, SensorError> {
        self.spawn_stream("exercise", to_sample).await
    }
}
