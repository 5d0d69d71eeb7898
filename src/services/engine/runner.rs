//! Single coordinating task around the SessionEngine
//!
//! All mutations of the engine happen on the runner task:
//! - commands arrive from [`EngineHandle`] with a oneshot reply
//! - sensor events arrive from one forwarding task per subscribed source
//!
//! Events are tagged with the session generation they were subscribed
//! under, so anything still queued from a stopped session is discarded.
//! After every mutation the runner publishes a fresh snapshot on a watch
//! channel; readers never block the runner.

use super::{EngineError, LocationOutcome, SessionEngine};
use crate::domain::session::{SessionSnapshot, SessionSummary};
use crate::domain::types::{ActivityType, HeartRateReading, LocationFix, MetricsSample, SessionId};
use crate::infra::metrics::Metrics;
use crate::io::sink::TelemetrySink;
use crate::io::sources::{ExerciseSession, HeartRateSource, LocationSource, SensorError};
use crate::services::publisher::{PublisherSettings, TelemetryPublisher};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A sensor event on its way to the engine
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionEvent {
    Location(LocationFix),
    Metrics(MetricsSample),
    HeartRate(HeartRateReading),
}

impl SessionEvent {
    fn source(&self) -> &'static str {
        match self {
            SessionEvent::Location(_) => "location",
            SessionEvent::Metrics(_) => "exercise",
            SessionEvent::HeartRate(_) => "heart_rate",
        }
    }
}

#[derive(Debug)]
struct TaggedEvent {
    generation: u64,
    event: SessionEvent,
}

/// Capabilities the runner subscribes to at every session start
#[derive(Clone, Default)]
pub struct SessionSources {
    pub location: Option<Arc<dyn LocationSource>>,
    pub heart_rate: Option<Arc<dyn HeartRateSource>>,
    pub exercise: Option<Arc<dyn ExerciseSession>>,
}

enum Command {
    Start {
        session_id: Option<SessionId>,
        activity_type: Option<ActivityType>,
        reply: oneshot::Sender<Result<SessionId, EngineError>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Stop {
        reply: oneshot::Sender<Result<SessionSummary, EngineError>>,
    },
}

/// Cloneable entry point to the engine. Every consumer (command listener,
/// UI, tests) talks to the same runner through one of these.
#[derive(Clone)]
pub struct EngineHandle {
    cmd_tx: mpsc::Sender<Command>,
    snapshots: watch::Receiver<Option<SessionSnapshot>>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx.send(make(reply)).await.map_err(|_| EngineError::EngineClosed)?;
        rx.await.map_err(|_| EngineError::EngineClosed)?
    }

    pub async fn start(
        &self,
        session_id: Option<SessionId>,
        activity_type: Option<ActivityType>,
    ) -> Result<SessionId, EngineError> {
        self.request(|reply| Command::Start { session_id, activity_type, reply }).await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Pause { reply }).await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.request(|reply| Command::Resume { reply }).await
    }

    pub async fn stop(&self) -> Result<SessionSummary, EngineError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    /// Latest published snapshot, `None` while idle
    pub fn current_snapshot(&self) -> Option<SessionSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Receiver that is notified after every engine mutation
    pub fn subscribe_snapshots(&self) -> watch::Receiver<Option<SessionSnapshot>> {
        self.snapshots.clone()
    }
}

/// Grace on top of the publish timeout before the publisher is aborted
const PUBLISHER_STOP_GRACE: Duration = Duration::from_millis(500);

/// Running telemetry publisher and its stop signal
struct PublisherTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Per-session tasks owned by the runner
struct ActiveTasks {
    forwarders: Vec<(&'static str, JoinHandle<()>)>,
    publisher: Option<PublisherTask>,
    /// `ExerciseSession::start` succeeded, so `stop` is owed
    exercise_started: bool,
}

pub struct EngineRunner {
    engine: SessionEngine,
    sources: SessionSources,
    sink: Option<Arc<dyn TelemetrySink>>,
    publisher_settings: PublisherSettings,
    metrics: Arc<Metrics>,
    cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<TaggedEvent>,
    event_rx: mpsc::Receiver<TaggedEvent>,
    snapshot_tx: watch::Sender<Option<SessionSnapshot>>,
    generation: u64,
    tasks: Option<ActiveTasks>,
}

impl EngineRunner {
    pub fn new(
        engine: SessionEngine,
        sources: SessionSources,
        sink: Option<Arc<dyn TelemetrySink>>,
        publisher_settings: PublisherSettings,
        event_buffer: usize,
    ) -> (Self, EngineHandle) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(event_buffer.max(1));
        let (snapshot_tx, snapshots) = watch::channel(None);
        let metrics = engine.metrics.clone();
        let runner = Self {
            engine,
            sources,
            sink,
            publisher_settings,
            metrics,
            cmd_rx,
            event_tx,
            event_rx,
            snapshot_tx,
            generation: 0,
            tasks: None,
        };
        (runner, EngineHandle { cmd_tx, snapshots })
    }

    /// Process commands and events until shutdown or until every handle is dropped
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("engine_runner_started");
        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => self.handle_command(cmd).await,
                        None => break,
                    }
                }
                Some(tagged) = self.event_rx.recv() => {
                    self.handle_event(tagged);
                }
            }
        }

        if let Some(session_id) = self.engine.session_id() {
            warn!(session_id = %session_id, "engine_runner_exit_with_active_session");
        }
        self.teardown_tasks().await;
        info!("engine_runner_stopped");
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Start { session_id, activity_type, reply } => {
                let result = self.start_session(session_id, activity_type).await;
                let _ = reply.send(result);
            }
            Command::Pause { reply } => {
                let result = self.engine.pause();
                self.publish_snapshot();
                let _ = reply.send(result);
            }
            Command::Resume { reply } => {
                let result = self.engine.resume();
                self.publish_snapshot();
                let _ = reply.send(result);
            }
            Command::Stop { reply } => {
                let result = self.stop_session().await;
                let _ = reply.send(result);
            }
        }
    }

    async fn start_session(
        &mut self,
        session_id: Option<SessionId>,
        activity_type: Option<ActivityType>,
    ) -> Result<SessionId, EngineError> {
        let session_id = self.engine.start(session_id, activity_type.clone())?;
        self.generation += 1;
        let generation = self.generation;
        let activity = activity_type.unwrap_or_default();

        let mut forwarders = Vec::with_capacity(3);
        let mut exercise_started = false;

        if let Some(exercise) = self.sources.exercise.clone() {
            match exercise.start(&activity).await {
                Ok(()) => {
                    exercise_started = true;
                    match exercise.metrics_stream().await {
                        Ok(rx) => forwarders.push((
                            "exercise",
                            self.spawn_forwarder(rx, generation, SessionEvent::Metrics),
                        )),
                        Err(e) => log_unavailable("exercise", &e),
                    }
                }
                Err(e) => log_unavailable("exercise", &e),
            }
        }
        if let Some(location) = self.sources.location.clone() {
            match location.subscribe().await {
                Ok(rx) => forwarders.push((
                    "location",
                    self.spawn_forwarder(rx, generation, SessionEvent::Location),
                )),
                Err(e) => log_unavailable("location", &e),
            }
        }
        if let Some(heart_rate) = self.sources.heart_rate.clone() {
            match heart_rate.subscribe().await {
                Ok(rx) => forwarders.push((
                    "heart_rate",
                    self.spawn_forwarder(rx, generation, SessionEvent::HeartRate),
                )),
                Err(e) => log_unavailable("heart_rate", &e),
            }
        }

        self.publish_snapshot();

        let publisher = self.sink.clone().map(|sink| {
            let (stop, stop_rx) = watch::channel(false);
            let publisher = TelemetryPublisher::new(
                sink,
                self.snapshot_tx.subscribe(),
                self.publisher_settings.clone(),
                self.metrics.clone(),
            );
            PublisherTask { stop, handle: tokio::spawn(publisher.run(stop_rx)) }
        });

        debug!(
            session_id = %session_id,
            generation = %generation,
            sources = %forwarders.len(),
            "session_sources_subscribed"
        );
        self.tasks = Some(ActiveTasks { forwarders, publisher, exercise_started });
        Ok(session_id)
    }

    async fn stop_session(&mut self) -> Result<SessionSummary, EngineError> {
        if !self.engine.is_active() {
            return Err(EngineError::NoActiveSession);
        }
        self.teardown_tasks().await;
        let summary = self.engine.stop()?;
        self.publish_snapshot();
        Ok(summary)
    }

    /// Cancel every per-session task. Each one is torn down on its own so a
    /// failure in one never leaves the others running.
    ///
    /// Returns only once the publisher has exited, so no live update can
    /// follow the summary.
    async fn teardown_tasks(&mut self) {
        let Some(tasks) = self.tasks.take() else {
            return;
        };
        for (source, handle) in &tasks.forwarders {
            handle.abort();
            debug!(source = %source, "source_unsubscribed");
        }
        if tasks.exercise_started {
            if let Some(exercise) = self.sources.exercise.as_ref() {
                if let Err(e) = exercise.stop().await {
                    warn!(error = %e, "exercise_stop_failed");
                }
            }
        }
        if let Some(publisher) = tasks.publisher {
            self.stop_publisher(publisher).await;
        }
    }

    /// Signal the publisher and wait for it; an in-flight publish gets at most
    /// its own timeout plus a short grace before the task is aborted
    async fn stop_publisher(&self, publisher: PublisherTask) {
        let PublisherTask { stop, mut handle } = publisher;
        let _ = stop.send(true);
        let grace = self.publisher_settings.timeout + PUBLISHER_STOP_GRACE;
        match tokio::time::timeout(grace, &mut handle).await {
            Ok(Ok(())) => debug!("publisher_joined"),
            Ok(Err(e)) => warn!(error = %e, "publisher_join_failed"),
            Err(_) => {
                handle.abort();
                warn!(grace_ms = %grace.as_millis(), "publisher_aborted");
            }
        }
    }

    fn spawn_forwarder<T: Send + 'static>(
        &self,
        mut rx: mpsc::Receiver<T>,
        generation: u64,
        wrap: fn(T) -> SessionEvent,
    ) -> JoinHandle<()> {
        let tx = self.event_tx.clone();
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            while let Some(item) = rx.recv().await {
                let tagged = TaggedEvent { generation, event: wrap(item) };
                match tx.try_send(tagged) {
                    Ok(()) => {}
                    Err(TrySendError::Full(dropped)) => {
                        metrics.record_event_dropped();
                        debug!(source = %dropped.event.source(), "engine_queue_full");
                    }
                    Err(TrySendError::Closed(_)) => break,
                }
            }
        })
    }

    fn handle_event(&mut self, tagged: TaggedEvent) {
        if tagged.generation != self.generation || !self.engine.is_active() {
            debug!(
                source = %tagged.event.source(),
                generation = %tagged.generation,
                "stale_event_discarded"
            );
            return;
        }
        let changed = match tagged.event {
            // rejected fixes can still flip the stationary flag
            SessionEvent::Location(fix) => self.engine.on_location(fix) != LocationOutcome::Idle,
            SessionEvent::Metrics(sample) => self.engine.on_metrics_sample(sample) > 0,
            SessionEvent::HeartRate(reading) => self.engine.on_heart_rate(reading).is_some(),
        };
        if changed {
            self.publish_snapshot();
        }
    }

    fn publish_snapshot(&self) {
        self.snapshot_tx.send_replace(self.engine.snapshot());
    }
}

fn log_unavailable(source: &str, error: &SensorError) {
    warn!(source = %source, error = %error, "sensor_unavailable");
}
