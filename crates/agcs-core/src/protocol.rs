//! Observer stream protocol.
//!
//! Every outbound frame is a JSON object `{type, mission_id, timestamp, data}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{Insight, Mission, MissionId, MissionStatus, TelemetrySample};

/// Status snapshot carried by `mission_update` envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionUpdate {
    pub status: MissionStatus,
    pub progress: f64,
    pub current_waypoint_index: usize,
    pub distance_traveled_m: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MissionUpdate {
    pub fn from_mission(mission: &Mission, message: Option<String>) -> Self {
        Self {
            status: mission.status,
            progress: mission.progress,
            current_waypoint_index: mission.current_waypoint_index,
            distance_traveled_m: mission.distance_traveled_m,
            message,
        }
    }
}

/// Server to observer envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamMessage {
    Telemetry {
        mission_id: MissionId,
        timestamp: DateTime<Utc>,
        data: TelemetrySample,
    },
    MissionUpdate {
        mission_id: MissionId,
        timestamp: DateTime<Utc>,
        data: MissionUpdate,
    },
    Alert {
        mission_id: MissionId,
        timestamp: DateTime<Utc>,
        data: Insight,
    },
    Pong {
        mission_id: MissionId,
        timestamp: DateTime<Utc>,
    },
    Error {
        mission_id: MissionId,
        timestamp: DateTime<Utc>,
        message: String,
    },
}

impl StreamMessage {
    pub fn telemetry(sample: TelemetrySample) -> Self {
        StreamMessage::Telemetry {
            mission_id: sample.mission_id,
            timestamp: sample.timestamp,
            data: sample,
        }
    }

    pub fn mission_update(mission: &Mission, message: Option<String>) -> Self {
        StreamMessage::MissionUpdate {
            mission_id: mission.id,
            timestamp: Utc::now(),
            data: MissionUpdate::from_mission(mission, message),
        }
    }

    pub fn alert(insight: Insight) -> Self {
        StreamMessage::Alert {
            mission_id: insight.mission_id,
            timestamp: insight.timestamp,
            data: insight,
        }
    }

    pub fn mission_id(&self) -> MissionId {
        match self {
            StreamMessage::Telemetry { mission_id, .. }
            | StreamMessage::MissionUpdate { mission_id, .. }
            | StreamMessage::Alert { mission_id, .. }
            | StreamMessage::Pong { mission_id, .. }
            | StreamMessage::Error { mission_id, .. } => *mission_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StreamMessage::Telemetry { .. } => "telemetry",
            StreamMessage::MissionUpdate { .. } => "mission_update",
            StreamMessage::Alert { .. } => "alert",
            StreamMessage::Pong { .. } => "pong",
            StreamMessage::Error { .. } => "error",
        }
    }
}

/// Route progress reported by a real drone link.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    /// Percent of the planned route flown, 0 to 100.
    pub progress: f64,
    pub waypoint_index: usize,
    #[serde(default)]
    pub distance_traveled_m: f64,
}

/// Observer to server message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// A sample from a real drone link.
    Telemetry { data: TelemetrySample },
    /// Progress from a real drone link. Completes the mission at 100 %.
    MissionStatus { data: ProgressReport },
    Ping,
}
