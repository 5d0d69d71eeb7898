//! End-to-end session flow through the engine runner
//!
//! Sensors are channel-backed, the sink records everything it is given.

use async_trait::async_trait;
use parking_lot::Mutex;
use run_tracker::domain::session::{SessionSnapshot, SessionState, SessionSummary};
use run_tracker::domain::types::{HeartRateReading, LocationFix, MetricsSample, SessionId};
use run_tracker::infra::{Config, ManualClock, Metrics, ProfileStore, ScaledClock};
use run_tracker::io::{
    ChannelExercise, ChannelSource, CommandHandler, PublishError, ReplayFile, TelemetryPayload,
    TelemetrySink,
};
use run_tracker::services::engine::{EngineHandle, EngineRunner, SessionEngine, SessionSources};
use run_tracker::services::publisher::PublisherSettings;
use run_tracker::services::EngineError;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

const START_MS: u64 = 1_767_617_600_000;
const TEN_METERS_LAT: f64 = 0.00009;
const WAIT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct RecordingSink {
    /// Simulated transport latency for live updates
    publish_delay: Option<Duration>,
    payloads: Mutex<Vec<TelemetryPayload>>,
    summaries: Mutex<Vec<SessionSummary>>,
    responses: Mutex<Vec<serde_json::Value>>,
}

#[async_trait]
impl TelemetrySink for RecordingSink {
    async fn publish(&self, payload: &TelemetryPayload) -> Result<(), PublishError> {
        if let Some(delay) = self.publish_delay {
            tokio::time::sleep(delay).await;
        }
        self.payloads.lock().push(payload.clone());
        Ok(())
    }

    async fn publish_summary(&self, summary: &SessionSummary) -> Result<(), PublishError> {
        self.summaries.lock().push(summary.clone());
        Ok(())
    }

    async fn publish_response(&self, response: &serde_json::Value) -> Result<(), PublishError> {
        self.responses.lock().push(response.clone());
        Ok(())
    }
}

struct Harness {
    handle: EngineHandle,
    fixes: mpsc::Sender<LocationFix>,
    heart_rate: mpsc::Sender<HeartRateReading>,
    samples: mpsc::Sender<MetricsSample>,
    exercise: Arc<ChannelExercise>,
    sink: Arc<RecordingSink>,
    metrics: Arc<Metrics>,
    profile: Arc<ProfileStore>,
    clock: Arc<ManualClock>,
    _shutdown: watch::Sender<bool>,
}

fn spawn_runner() -> Harness {
    spawn_runner_with_sink(RecordingSink::default())
}

fn spawn_runner_with_sink(sink: RecordingSink) -> Harness {
    let config = Config::default();
    let clock = Arc::new(ManualClock::new(START_MS));
    let profile = Arc::new(ProfileStore::new(70));
    let metrics = Arc::new(Metrics::new());

    let (location, fixes) = ChannelSource::<LocationFix>::new(64);
    let (hr_source, heart_rate) = ChannelSource::<HeartRateReading>::new(64);
    let (exercise, samples) = ChannelExercise::new(64);
    let exercise = Arc::new(exercise);
    let sources = SessionSources {
        location: Some(Arc::new(location)),
        heart_rate: Some(Arc::new(hr_source)),
        exercise: Some(exercise.clone()),
    };

    let sink = Arc::new(sink);
    let engine = SessionEngine::new(&config, clock.clone(), profile.clone(), metrics.clone());
    let (runner, handle) = EngineRunner::new(
        engine,
        sources,
        Some(sink.clone()),
        PublisherSettings::from_config(&config),
        config.event_buffer(),
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(runner.run(shutdown_rx));

    Harness {
        handle,
        fixes,
        heart_rate,
        samples,
        exercise,
        sink,
        metrics,
        profile,
        clock,
        _shutdown: shutdown_tx,
    }
}

/// Fix `steps` times ten meters north of the start, `offset_ms` after it
fn fix_at(steps: u32, offset_ms: u64) -> LocationFix {
    LocationFix::new(37.5 + steps as f64 * TEN_METERS_LAT, 127.0, 5.0, START_MS + offset_ms)
}

async fn wait_for_snapshot(
    handle: &EngineHandle,
    predicate: impl FnMut(&Option<SessionSnapshot>) -> bool,
) -> Option<SessionSnapshot> {
    let mut rx = handle.subscribe_snapshots();
    let snapshot = tokio::time::timeout(WAIT, rx.wait_for(predicate))
        .await
        .expect("snapshot condition not reached in time")
        .expect("engine runner gone");
    snapshot.clone()
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(WAIT, async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

fn point_count(snapshot: &Option<SessionSnapshot>) -> usize {
    snapshot.as_ref().map_or(0, |s| s.point_count)
}

#[tokio::test]
async fn test_full_session_flow() {
    let h = spawn_runner();

    let id = h.handle.start(Some(SessionId::from("flow-1")), None).await.unwrap();
    assert_eq!(id.as_str(), "flow-1");
    assert_eq!(h.exercise.starts(), 1);
    assert_eq!(
        h.handle.start(None, None).await.unwrap_err(),
        EngineError::AlreadyActive
    );

    h.clock.set_ms(START_MS + 4000);
    h.fixes.send(fix_at(0, 0)).await.unwrap();
    h.fixes.send(fix_at(1, 4000)).await.unwrap();
    let snapshot = wait_for_snapshot(&h.handle, |s| point_count(s) == 2).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Running);
    assert!((snapshot.total_distance_meters - 9.5).abs() < 0.5);
    assert_eq!(snapshot.duration_seconds, 4);

    // paused: the fix is counted but never becomes a point
    h.handle.pause().await.unwrap();
    assert_eq!(h.handle.current_snapshot().unwrap().state, SessionState::Paused);
    h.fixes.send(fix_at(2, 8000)).await.unwrap();
    let metrics = h.metrics.clone();
    eventually(|| metrics.fixes_ignored_paused() == 1).await;
    assert_eq!(point_count(&h.handle.current_snapshot()), 2);

    h.handle.resume().await.unwrap();
    h.clock.set_ms(START_MS + 12_000);
    h.fixes.send(fix_at(3, 12_000)).await.unwrap();
    let snapshot = wait_for_snapshot(&h.handle, |s| point_count(s) == 3).await.unwrap();
    assert_eq!(snapshot.state, SessionState::Running);
    // the paused fix moved the anchor, so only one step is added
    assert!((snapshot.total_distance_meters - 19.0).abs() < 1.0);

    h.samples
        .send(MetricsSample { heart_rate: Some(150.0), ..Default::default() })
        .await
        .unwrap();
    let snapshot =
        wait_for_snapshot(&h.handle, |s| s.as_ref().and_then(|s| s.heart_rate) == Some(150))
            .await
            .unwrap();
    assert_eq!(snapshot.point_count, 3);

    let summary = h.handle.stop().await.unwrap();
    assert_eq!(summary.session_id.as_str(), "flow-1");
    assert_eq!(summary.route_points.len(), 3);
    let sequences: Vec<u32> = summary.route_points.iter().map(|p| p.sequence).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert_eq!(h.exercise.stops(), 1);
    assert!(h.handle.current_snapshot().is_none());

    // the publisher ticks immediately at session start
    assert!(!h.sink.payloads.lock().is_empty());
    assert!(h.sink.payloads.lock().iter().all(|p| p.session_id == "flow-1"));
}

#[tokio::test]
async fn test_commands_without_session() {
    let h = spawn_runner();
    assert_eq!(h.handle.pause().await.unwrap_err(), EngineError::NoActiveSession);
    assert_eq!(h.handle.resume().await.unwrap_err(), EngineError::NoActiveSession);
    assert_eq!(h.handle.stop().await.unwrap_err(), EngineError::NoActiveSession);
    assert!(h.handle.current_snapshot().is_none());
}

#[tokio::test]
async fn test_events_after_stop_are_ignored() {
    let h = spawn_runner();
    h.handle.start(None, None).await.unwrap();
    h.fixes.send(fix_at(0, 0)).await.unwrap();
    wait_for_snapshot(&h.handle, |s| point_count(s) == 1).await;
    h.handle.stop().await.unwrap();

    // forwarders are gone; whatever still arrives must not touch the engine
    let _ = h.fixes.send(fix_at(1, 4000)).await;
    let _ = h.heart_rate.send(HeartRateReading { bpm: 140.0, timestamp_ms: START_MS }).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(h.handle.current_snapshot().is_none());
    assert_eq!(h.metrics.fixes_received(), 1);
}

#[tokio::test]
async fn test_restart_survives_exhausted_sources() {
    let h = spawn_runner();
    let first = h.handle.start(None, None).await.unwrap();
    h.handle.stop().await.unwrap();

    // channel sources hand out their receiver once; the second session runs without them
    let second = h.handle.start(None, None).await.unwrap();
    assert_ne!(first, second);
    assert_eq!(h.exercise.starts(), 2);
    let snapshot = h.handle.current_snapshot().unwrap();
    assert_eq!(snapshot.session_id, second);
    assert_eq!(snapshot.point_count, 0);
}

#[tokio::test]
async fn test_command_handler_round_trip() {
    let h = spawn_runner();
    let handler = CommandHandler::new(
        h.handle.clone(),
        h.profile.clone(),
        Some(h.sink.clone()),
        Duration::from_secs(1),
        h.metrics.clone(),
    );

    let response =
        handler.handle_line(r#"{"command":"start","sessionId":"phone-7","runningType":"run"}"#).await;
    assert_eq!(response["success"], true);
    assert_eq!(response["sessionId"], "phone-7");
    assert_eq!(response["command"], "start");

    let response = handler.handle_line(r#"{"command":"sync_profile","weight":80,"height":180}"#).await;
    assert_eq!(response["success"], true);
    assert_eq!(h.profile.height_cm(), Some(180));

    let response = handler.handle_line(r#"{"command":"start"}"#).await;
    assert_eq!(response["success"], false);

    let response = handler.handle_line(r#"{"command":"stop","sessionId":"phone-7"}"#).await;
    assert_eq!(response["success"], true);
    assert_eq!(h.sink.summaries.lock().len(), 1);
    assert_eq!(h.sink.summaries.lock()[0].session_id.as_str(), "phone-7");

    let response = handler.handle_line("{not json").await;
    assert_eq!(response["success"], false);

    // parse failures are answered on the connection only
    assert_eq!(h.sink.responses.lock().len(), 4);
}

#[tokio::test]
async fn test_stop_waits_for_in_flight_publish() {
    let h = spawn_runner_with_sink(RecordingSink {
        publish_delay: Some(Duration::from_millis(300)),
        ..Default::default()
    });
    h.handle.start(None, None).await.unwrap();
    // first tick is immediate, so a publish is now in flight
    tokio::time::sleep(Duration::from_millis(50)).await;

    h.handle.stop().await.unwrap();
    let delivered_at_stop = h.sink.payloads.lock().len();
    assert_eq!(delivered_at_stop, 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(h.sink.payloads.lock().len(), delivered_at_stop);
}

#[tokio::test]
async fn test_failed_exercise_stop_still_tears_down() {
    let h = spawn_runner();
    h.handle.start(None, None).await.unwrap();
    h.fixes.send(fix_at(0, 0)).await.unwrap();
    wait_for_snapshot(&h.handle, |s| point_count(s) == 1).await;

    h.exercise.set_fail_stop(true);
    let summary = h.handle.stop().await.unwrap();
    assert_eq!(summary.route_points.len(), 1);
    assert_eq!(h.exercise.stops(), 1);
    assert!(h.handle.current_snapshot().is_none());

    // the location forwarder was cancelled regardless
    let _ = h.fixes.send(fix_at(1, 4000)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.metrics.fixes_received(), 1);
}

#[tokio::test]
async fn test_exercise_not_stopped_when_start_failed() {
    let h = spawn_runner();
    h.exercise.set_fail_start(true);

    h.handle.start(None, None).await.unwrap();
    h.fixes.send(fix_at(0, 0)).await.unwrap();
    wait_for_snapshot(&h.handle, |s| point_count(s) == 1).await;
    h.handle.stop().await.unwrap();

    assert_eq!(h.exercise.starts(), 1);
    assert_eq!(h.exercise.stops(), 0);
}

const RECORDED_RUN: &str = r#"{"kind":"fix","at_ms":0,"latitude":37.5,"longitude":127.0,"accuracy":5.0}
{"kind":"fix","at_ms":10000,"latitude":37.50009,"longitude":127.0,"accuracy":5.0}
{"kind":"fix","at_ms":20000,"latitude":37.50018,"longitude":127.0,"accuracy":5.0}
"#;

#[tokio::test(start_paused = true)]
async fn test_fast_replay_keeps_recorded_duration() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(RECORDED_RUN.as_bytes()).unwrap();
    file.flush().unwrap();

    let config = Config::default();
    let replay = Arc::new(ReplayFile::new(file.path(), 2.0));
    let clock = Arc::new(ScaledClock::new(replay.speed_factor()));
    let metrics = Arc::new(Metrics::new());
    let engine =
        SessionEngine::new(&config, clock, Arc::new(ProfileStore::new(70)), metrics.clone());
    let sources = SessionSources {
        location: Some(replay.clone()),
        heart_rate: Some(replay.clone()),
        exercise: Some(replay),
    };
    let (runner, handle) = EngineRunner::new(
        engine,
        sources,
        None,
        PublisherSettings::from_config(&config),
        config.event_buffer(),
    );
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(runner.run(shutdown_rx));

    handle.start(None, None).await.unwrap();
    let started = tokio::time::Instant::now();
    let mut rx = handle.subscribe_snapshots();
    tokio::time::timeout(Duration::from_secs(120), rx.wait_for(|s| point_count(s) == 3))
        .await
        .unwrap()
        .unwrap();

    // 20 s of recording replayed in 10 s of wall time
    let replayed_in = started.elapsed();
    assert!(replayed_in >= Duration::from_secs(10) && replayed_in < Duration::from_secs(11));
    let summary = handle.stop().await.unwrap();
    assert_eq!(summary.duration_seconds, 20);
    assert_eq!(summary.route_points[2].elapsed_seconds, 20);
    assert!((summary.total_distance_meters - 19.0).abs() < 1.0);
}
