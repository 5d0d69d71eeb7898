//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `engine` - Session state machine and its coordinating task
//! - `location_filter` - GPS noise filter and stationary detector
//! - `fusion` - Platform/GPS metrics fusion and heart-rate smoothing
//! - `distance` - Great-circle distance and pace math
//! - `pace_estimator` - Pace over the trailing 100 m
//! - `calories` - Energy expenditure models
//! - `publisher` - Periodic telemetry publisher

pub mod calories;
pub mod distance;
pub mod engine;
pub mod fusion;
pub mod location_filter;
pub mod pace_estimator;
pub mod publisher;

// Re-export commonly used types
pub use engine::{EngineError, EngineHandle, EngineRunner, SessionEngine};
pub use publisher::TelemetryPublisher;
