//! Domain models - core run tracking types
//!
//! This module contains the canonical data types used throughout the system:
//! - `LocationFix`, `MetricsSample`, `HeartRateReading` - raw sensor inputs
//! - `RoutePoint` - one accepted, immutable sample of the route
//! - `Session` - the live session owned by the engine
//! - `SessionSummary` / `SessionSnapshot` - immutable copies handed to callers

pub mod session;
pub mod types;

pub use session::{epoch_ms, Session, SessionSnapshot, SessionState, SessionSummary};
pub use types::{
    ActivityType, HeartRateReading, LocationFix, MetricsSample, RoutePoint, SessionId,
};
