//! IO modules - external system interfaces
//!
//! This module contains all external IO operations:
//! - `sources` - Sensor capability traits (location, heart rate, exercise session)
//! - `sink` - Telemetry sink trait and wire payloads
//! - `mqtt_sink` - MQTT publisher for live telemetry and session summaries
//! - `command_listener` - TCP listener for companion commands
//! - `replay` - JSONL recording replayed as live sources
//! - `channel_source` - Sources backed by in-process channels

pub mod channel_source;
pub mod command_listener;
pub mod mqtt_sink;
pub mod replay;
pub mod sink;
pub mod sources;

// Re-export commonly used types
pub use channel_source::{ChannelExercise, ChannelSource};
pub use command_listener::{
    start_command_listener, CommandHandler, CommandListenerConfig, CompanionCommand,
};
pub use mqtt_sink::MqttSink;
pub use replay::ReplayFile;
pub use sink::{CurrentPoint, PublishError, TelemetryPayload, TelemetrySink};
pub use sources::{ExerciseSession, HeartRateSource, LocationSource, SensorError};
