//! Run session state machine
//!
//! The SessionEngine owns the live session and everything derived from it:
//! - Lifecycle (start, pause, resume, stop)
//! - Location processing (noise filter, distance, pace, calories)
//! - Metrics fusion with platform samples and the heart-rate sensor
//!
//! The engine itself is synchronous and single-owner. `runner` wraps it in
//! one coordinating task and hands out a cloneable [`EngineHandle`].

mod handlers;
pub mod runner;

pub use handlers::LocationOutcome;
pub use runner::{EngineHandle, EngineRunner, SessionEvent, SessionSources};

use crate::domain::session::{Session, SessionSnapshot, SessionState, SessionSummary};
use crate::domain::types::{ActivityType, SessionId};
use crate::infra::clock::Clock;
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::infra::profile::WeightProvider;
use crate::services::calories::CalorieModel;
use crate::services::distance::average_pace;
use crate::services::fusion::{FusionPolicy, FusionState, HeartRateSmoother};
use crate::services::location_filter::{LocationFilter, StationaryDetector};
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

/// Errors surfaced to engine callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("a session is already active")]
    AlreadyActive,
    #[error("no active session")]
    NoActiveSession,
    #[error("engine is no longer running")]
    EngineClosed,
}

pub struct SessionEngine {
    /// Live session, `None` while idle
    pub(crate) session: Option<Session>,
    /// Transient fusion values, reset at every start and stop
    pub(crate) fusion: FusionState,
    pub(crate) hr_smoother: HeartRateSmoother,
    pub(crate) filter: LocationFilter,
    /// Advisory only, never gates route points
    pub(crate) stationary: StationaryDetector,
    pub(crate) calorie_model: CalorieModel,
    pub(crate) fusion_policy: FusionPolicy,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) weight: Arc<dyn WeightProvider>,
    pub(crate) metrics: Arc<Metrics>,
}

impl SessionEngine {
    pub fn new(
        config: &Config,
        clock: Arc<dyn Clock>,
        weight: Arc<dyn WeightProvider>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            session: None,
            fusion: FusionState::default(),
            hr_smoother: HeartRateSmoother::new(),
            filter: LocationFilter::new(config.max_accuracy_m(), config.max_speed_mps()),
            stationary: StationaryDetector::new(config.stationary_window_secs()),
            calorie_model: config.calorie_model(),
            fusion_policy: config.fusion_policy(),
            clock,
            weight,
            metrics,
        }
    }

    /// Begin a new session. A missing id is generated.
    pub fn start(
        &mut self,
        session_id: Option<SessionId>,
        activity_type: Option<ActivityType>,
    ) -> Result<SessionId, EngineError> {
        if self.session.is_some() {
            return Err(EngineError::AlreadyActive);
        }
        let session_id = session_id.unwrap_or_else(SessionId::generate);
        let activity_type = activity_type.unwrap_or_default();
        let started_at_ms = self.clock.now_ms();

        self.reset_transient();
        self.session = Some(Session::new(session_id.clone(), activity_type.clone(), started_at_ms));
        self.metrics.record_session_started();

        info!(
            session_id = %session_id,
            activity = %activity_type.as_str(),
            calorie_model = %self.calorie_model.as_str(),
            fusion_policy = %self.fusion_policy.as_str(),
            "session_started"
        );
        Ok(session_id)
    }

    /// Stop appending route points. Idempotent.
    pub fn pause(&mut self) -> Result<(), EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NoActiveSession)?;
        if !self.fusion.paused {
            self.fusion.paused = true;
            info!(session_id = %session.session_id, points = %session.route_points.len(), "session_paused");
        }
        Ok(())
    }

    /// Resume appending route points. Idempotent.
    pub fn resume(&mut self) -> Result<(), EngineError> {
        let session = self.session.as_ref().ok_or(EngineError::NoActiveSession)?;
        if self.fusion.paused {
            self.fusion.paused = false;
            // the window spans the pause otherwise
            self.stationary.reset();
            info!(session_id = %session.session_id, "session_resumed");
        }
        Ok(())
    }

    /// End the session and hand back its summary. The engine is idle afterwards.
    pub fn stop(&mut self) -> Result<SessionSummary, EngineError> {
        let mut session = self.session.take().ok_or(EngineError::NoActiveSession)?;
        let ended_at_ms = self.clock.now_ms();

        session.calories = self.calorie_model.calories(
            session.total_distance_meters,
            session.duration_seconds,
            self.weight.weight_kg(),
        );
        self.reset_transient();

        let summary = session.into_summary(ended_at_ms);
        self.metrics.record_session_completed();
        info!(
            session_id = %summary.session_id,
            distance_m = format!("{:.1}", summary.total_distance_meters),
            duration_s = %summary.duration_seconds,
            points = %summary.route_points.len(),
            calories = %summary.calories,
            avg_hr = ?summary.average_heart_rate,
            max_hr = ?summary.max_heart_rate,
            "session_stopped"
        );
        Ok(summary)
    }

    pub fn state(&self) -> SessionState {
        match (&self.session, self.fusion.paused) {
            (None, _) => SessionState::Idle,
            (Some(_), false) => SessionState::Running,
            (Some(_), true) => SessionState::Paused,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn session_id(&self) -> Option<&SessionId> {
        self.session.as_ref().map(|s| &s.session_id)
    }

    /// Immutable copy of the live session, `None` while idle
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        let session = self.session.as_ref()?;
        Some(SessionSnapshot {
            session_id: session.session_id.clone(),
            state: self.state(),
            started_at_ms: session.started_at_ms,
            total_distance_meters: session.total_distance_meters,
            duration_seconds: session.duration_seconds,
            calories: session.calories,
            point_count: session.route_points.len(),
            last_point: session.last_point().cloned(),
            average_pace_seconds: average_pace(
                session.total_distance_meters,
                session.duration_seconds,
            ),
            heart_rate: self.fusion.heart_rate,
            stationary: self.stationary.is_stationary(),
        })
    }

    fn reset_transient(&mut self) {
        self.fusion = FusionState::default();
        self.hr_smoother = HeartRateSmoother::new();
        self.stationary.reset();
    }
}
