//! Infrastructure - configuration, metrics, clock and profile
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, defaults)
//! - `metrics` - Lock-free metrics collection
//! - `clock` - Injectable wall clock
//! - `profile` - Body weight provider synced from the companion

pub mod clock;
pub mod config;
pub mod metrics;
pub mod profile;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, ScaledClock, SystemClock};
pub use config::Config;
pub use metrics::Metrics;
pub use profile::{FixedWeight, ProfileStore, WeightProvider};
