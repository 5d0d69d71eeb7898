//! Run tracker - live session engine for a wrist-worn running device
//!
//! Tracks a run from raw location fixes, platform exercise samples and the
//! heart-rate sensor, and streams telemetry to the companion device.
//!
//! Module structure:
//! - `domain/` - Core types (LocationFix, RoutePoint, Session)
//! - `io/` - External interfaces (sources, MQTT sink, command listener, replay)
//! - `services/` - Business logic (SessionEngine, filter, fusion, publisher)
//! - `infra/` - Infrastructure (Config, Metrics, Clock, Profile)

use clap::Parser;
use run_tracker::infra::{Clock, Config, Metrics, ProfileStore, ScaledClock, SystemClock};
use run_tracker::io::{
    start_command_listener, CommandHandler, CommandListenerConfig, MqttSink, ReplayFile,
    TelemetrySink,
};
use run_tracker::services::engine::{EngineRunner, SessionEngine, SessionSources};
use run_tracker::services::publisher::{publish_summary, PublisherSettings};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Run tracker - live run session engine
#[derive(Parser, Debug)]
#[command(name = "run-tracker", version, about)]
struct Args {
    /// Path to TOML configuration file (falls back to CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Replay a JSONL recording as the sensor sources
    #[arg(long)]
    replay: Option<String>,

    /// Replay speed multiplier
    #[arg(long)]
    speed_factor: Option<f64>,

    /// Start a session right away instead of waiting for a companion command
    #[arg(long)]
    autostart: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Default: INFO, use RUST_LOG=debug for per-fix decisions
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_timer(UtcTime::rfc_3339())
            .with_target(false)
            .init();
    }

    info!(version = %env!("CARGO_PKG_VERSION"), git = %env!("GIT_HASH"), "run-tracker starting");

    let config_path = args.config.clone().unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        device_id = %config.device_id(),
        weight_kg = %config.weight_kg(),
        calorie_model = %config.calorie_model().as_str(),
        fusion_policy = %config.fusion_policy().as_str(),
        publish_interval_s = %config.publish_interval_secs(),
        mqtt_enabled = %config.mqtt_enabled(),
        commands_port = %config.commands_port(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());
    let profile = Arc::new(ProfileStore::new(config.weight_kg()));

    // Sensor sources
    let replay_path = args.replay.clone().or_else(|| config.replay_file().map(str::to_string));
    let (sources, clock): (SessionSources, Arc<dyn Clock>) = match replay_path {
        Some(path) => {
            let speed = args.speed_factor.unwrap_or_else(|| config.replay_speed_factor());
            let replay = Arc::new(ReplayFile::new(&path, speed));
            info!(file = %path, speed_factor = %replay.speed_factor(), "replay_sources");
            // session time runs at replay speed
            let clock: Arc<dyn Clock> = Arc::new(ScaledClock::new(replay.speed_factor()));
            let sources = SessionSources {
                location: Some(replay.clone()),
                heart_rate: Some(replay.clone()),
                exercise: Some(replay),
            };
            (sources, clock)
        }
        None => {
            warn!("no_sensor_sources_configured");
            let clock: Arc<dyn Clock> = Arc::new(SystemClock);
            (SessionSources::default(), clock)
        }
    };

    // Telemetry sink
    let sink: Option<Arc<dyn TelemetrySink>> = if config.mqtt_enabled() {
        Some(Arc::new(MqttSink::new(&config)))
    } else {
        info!("mqtt_sink_disabled");
        None
    };

    // Engine
    let engine = SessionEngine::new(&config, clock, profile.clone(), metrics.clone());
    let publisher_settings = PublisherSettings::from_config(&config);
    let publish_timeout = publisher_settings.timeout;
    let (runner, handle) =
        EngineRunner::new(engine, sources, sink.clone(), publisher_settings, config.event_buffer());
    let runner_task = tokio::spawn(runner.run(shutdown_rx.clone()));

    // Companion command listener
    let command_handler = CommandHandler::new(
        handle.clone(),
        profile.clone(),
        sink.clone(),
        publish_timeout,
        metrics.clone(),
    );
    let listener_config = CommandListenerConfig::from_config(&config);
    let listener_shutdown = shutdown_rx.clone();
    tokio::spawn(async move {
        if let Err(e) = start_command_listener(listener_config, command_handler, listener_shutdown).await {
            tracing::error!(error = %e, "command_listener_error");
        }
    });

    // Metrics reporter
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs().max(1);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    if args.autostart {
        match handle.start(None, None).await {
            Ok(session_id) => info!(session_id = %session_id, "autostart_session"),
            Err(e) => warn!(error = %e, "autostart_failed"),
        }
    }

    tokio::signal::ctrl_c().await.ok();
    info!("shutdown_signal_received");

    // Close out a running session so the companion still gets the summary
    if let Ok(summary) = handle.stop().await {
        if let Some(sink) = sink.as_ref() {
            let _ = publish_summary(sink.as_ref(), &summary, publish_timeout, &metrics).await;
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = runner_task.await {
        warn!(error = %e, "engine_runner_join_failed");
    }
    metrics.report().log();

    info!("run-tracker shutdown complete");
    Ok(())
}
