//! TCP listener for companion-device commands
//!
//! Listens on port 25900 (configurable) for newline-delimited JSON commands:
//! `{"command": "start", "sessionId": "...", "runningType": "..."}`
//! `{"command": "stop" | "pause" | "resume", "sessionId": "..."}`
//! `{"command": "sync_profile", "weight": 70, "height": 178}`
//!
//! Every command gets one JSON response line on the same connection. The
//! response is also mirrored to the sink's response path.

use crate::domain::session::epoch_ms;
use crate::domain::types::{ActivityType, SessionId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::profile::ProfileStore;
use crate::io::sink::TelemetrySink;
use crate::services::engine::EngineHandle;
use crate::services::publisher::publish_summary;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Command listener configuration
#[derive(Debug, Clone)]
pub struct CommandListenerConfig {
    pub port: u16,
    pub enabled: bool,
}

impl Default for CommandListenerConfig {
    fn default() -> Self {
        Self { port: 25900, enabled: true }
    }
}

impl CommandListenerConfig {
    pub fn from_config(config: &Config) -> Self {
        Self { port: config.commands_port(), enabled: config.commands_enabled() }
    }
}

/// A command from the companion device
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CompanionCommand {
    Start {
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
        #[serde(rename = "runningType", default)]
        running_type: Option<String>,
    },
    Stop {
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
    },
    Pause {
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
    },
    Resume {
        #[serde(rename = "sessionId", default)]
        session_id: Option<String>,
    },
    SyncProfile {
        #[serde(default)]
        weight: u32,
        #[serde(default)]
        height: u32,
    },
}

impl CompanionCommand {
    pub fn name(&self) -> &'static str {
        match self {
            CompanionCommand::Start { .. } => "start",
            CompanionCommand::Stop { .. } => "stop",
            CompanionCommand::Pause { .. } => "pause",
            CompanionCommand::Resume { .. } => "resume",
            CompanionCommand::SyncProfile { .. } => "sync_profile",
        }
    }
}

/// Blank strings count as absent
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Executes companion commands against the engine
#[derive(Clone)]
pub struct CommandHandler {
    engine: EngineHandle,
    profile: Arc<ProfileStore>,
    sink: Option<Arc<dyn TelemetrySink>>,
    publish_timeout: Duration,
    metrics: Arc<Metrics>,
}

impl CommandHandler {
    pub fn new(
        engine: EngineHandle,
        profile: Arc<ProfileStore>,
        sink: Option<Arc<dyn TelemetrySink>>,
        publish_timeout: Duration,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { engine, profile, sink, publish_timeout, metrics }
    }

    /// Parse and execute one line, returning the response object
    pub async fn handle_line(&self, line: &str) -> serde_json::Value {
        match serde_json::from_str::<CompanionCommand>(line) {
            Ok(cmd) => self.handle(cmd).await,
            Err(e) => {
                warn!(error = %e, "command_parse_failed");
                json!({ "success": false, "error": format!("invalid command: {e}") })
            }
        }
    }

    pub async fn handle(&self, cmd: CompanionCommand) -> serde_json::Value {
        let command = cmd.name();
        info!(command = %command, "command_received");

        let mut response = match cmd {
            CompanionCommand::Start { session_id, running_type } => {
                let session_id = non_blank(session_id).map(SessionId);
                let activity =
                    non_blank(running_type).map(|t| t.parse::<ActivityType>().unwrap_or_default());
                match self.engine.start(session_id, activity).await {
                    Ok(id) => json!({
                        "success": true,
                        "sessionId": id.as_str(),
                        "timestamp": epoch_ms(),
                    }),
                    Err(e) => json!({ "success": false, "error": e.to_string() }),
                }
            }
            CompanionCommand::Stop { session_id } => match self.engine.stop().await {
                Ok(summary) => {
                    let response = json!({
                        "success": true,
                        "sessionId": summary.session_id.as_str(),
                    });
                    if let Some(requested) = non_blank(session_id) {
                        if requested != summary.session_id.as_str() {
                            warn!(
                                requested = %requested,
                                stopped = %summary.session_id,
                                "stop_session_id_mismatch"
                            );
                        }
                    }
                    if let Some(sink) = self.sink.as_ref() {
                        // failure is logged and counted inside
                        let _ = publish_summary(
                            sink.as_ref(),
                            &summary,
                            self.publish_timeout,
                            &self.metrics,
                        )
                        .await;
                    }
                    response
                }
                Err(e) => json!({ "success": false, "error": e.to_string() }),
            },
            CompanionCommand::Pause { session_id } => match self.engine.pause().await {
                Ok(()) => json!({ "success": true, "sessionId": non_blank(session_id) }),
                Err(e) => json!({ "success": false, "error": e.to_string() }),
            },
            CompanionCommand::Resume { session_id } => match self.engine.resume().await {
                Ok(()) => json!({ "success": true, "sessionId": non_blank(session_id) }),
                Err(e) => json!({ "success": false, "error": e.to_string() }),
            },
            CompanionCommand::SyncProfile { weight, height } => {
                self.profile.set_weight_kg(weight);
                self.profile.set_height_cm(height);
                debug!(weight = %weight, height = %height, "profile_synced");
                json!({ "success": true })
            }
        };

        response["command"] = json!(command);
        if let Some(sink) = self.sink.as_ref() {
            if let Err(e) = sink.publish_response(&response).await {
                debug!(error = %e, "command_response_publish_failed");
            }
        }
        response
    }
}

/// Start the command TCP listener
///
/// Runs until the shutdown signal flips. Each connection is handled on its own task.
pub async fn start_command_listener(
    config: CommandListenerConfig,
    handler: CommandHandler,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    if !config.enabled {
        info!("command_listener_disabled");
        return Ok(());
    }

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(port = %config.port, "command_listener_started");

    serve(listener, handler, &mut shutdown).await;
    Ok(())
}

/// Accept loop over an already bound listener
pub async fn serve(
    listener: TcpListener,
    handler: CommandHandler,
    shutdown: &mut watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("command_listener_shutdown");
                    return;
                }
            }
            result = listener.accept() => {
                match result {
                    Ok((socket, addr)) => {
                        let handler = handler.clone();
                        tokio::spawn(async move {
                            handle_connection(socket, addr, handler).await;
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "command_listener_accept_failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(socket: TcpStream, addr: SocketAddr, handler: CommandHandler) {
    let peer = addr.to_string();
    debug!(peer = %peer, "command_connection_accepted");

    let (read_half, mut write_half) = socket.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let response = handler.handle_line(line).await;
        let mut out = response.to_string();
        out.push('\n');
        if let Err(e) = write_half.write_all(out.as_bytes()).await {
            warn!(peer = %peer, error = %e, "command_response_write_failed");
            break;
        }
    }

    debug!(peer = %peer, "command_connection_closed");
}
