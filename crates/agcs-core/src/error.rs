//! Error taxonomy shared by the server and the SDK.

use crate::models::{MissionId, MissionStatus};
use thiserror::Error;

/// Structural and state errors surfaced synchronously to command callers.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MissionError {
    #[error("mission {0} not found")]
    NotFound(MissionId),

    #[error("cannot {command} a mission that is {from}")]
    InvalidTransition {
        from: MissionStatus,
        command: &'static str,
    },

    #[error("mission {0} already has a running simulation")]
    AlreadyRunning(MissionId),

    #[error("mission needs at least 2 waypoints, got {count}")]
    InsufficientWaypoints { count: usize },

    #[error("invalid mission: {0}")]
    InvalidMission(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl MissionError {
    /// Stable machine-readable code used in API error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            MissionError::NotFound(_) => "not_found",
            MissionError::InvalidTransition { .. } => "invalid_transition",
            MissionError::AlreadyRunning(_) => "already_running",
            MissionError::InsufficientWaypoints { .. } => "insufficient_waypoints",
            MissionError::InvalidMission(_) => "invalid_mission",
            MissionError::Storage(_) => "storage",
        }
    }
}

/// Analysis errors. Never fatal to the telemetry path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    #[error("insufficient data: {reason}")]
    InsufficientData { samples: usize, reason: String },
}

impl AnalysisError {
    pub fn code(&self) -> &'static str {
        match self {
            AnalysisError::InsufficientData { .. } => "insufficient_data",
        }
    }

    /// Confidence attached to a failed analysis.
    pub fn confidence(&self) -> f64 {
        0.0
    }
}
