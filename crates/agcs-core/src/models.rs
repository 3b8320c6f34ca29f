//! Core data models for mission execution and telemetry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use crate::error::MissionError;
use crate::simulation::SimSnapshot;

pub type MissionId = i64;

/// A navigation target within a mission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub sequence: u32,
    #[serde(alias = "lat")]
    pub latitude: f64,
    #[serde(alias = "lng", alias = "lon")]
    pub longitude: f64,
    #[serde(alias = "alt")]
    pub altitude_m: f64,
    /// hover, photo, spray, ...
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub duration_s: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissionStatus {
    #[default]
    Planned,
    Running,
    Paused,
    Completed,
    Aborted,
}

impl MissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MissionStatus::Planned => "planned",
            MissionStatus::Running => "running",
            MissionStatus::Paused => "paused",
            MissionStatus::Completed => "completed",
            MissionStatus::Aborted => "aborted",
        }
    }

    /// Completed and aborted missions accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionStatus::Completed | MissionStatus::Aborted)
    }
}

impl fmt::Display for MissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MissionStatus {
    type Err = MissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(MissionStatus::Planned),
            "running" => Ok(MissionStatus::Running),
            "paused" => Ok(MissionStatus::Paused),
            "completed" => Ok(MissionStatus::Completed),
            "aborted" => Ok(MissionStatus::Aborted),
            other => Err(MissionError::Storage(format!("unknown mission status '{}'", other))),
        }
    }
}

/// A planned drone flight over an ordered set of waypoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Mission {
    pub id: MissionId,
    pub name: String,
    pub status: MissionStatus,
    pub altitude_m: f64,
    pub speed_ms: f64,
    pub waypoints: Vec<Waypoint>,
    pub current_waypoint_index: usize,
    pub progress: f64,
    pub distance_traveled_m: f64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Last known simulator state, used to resume after a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sim_snapshot: Option<SimSnapshot>,
}

impl Mission {
    /// Apply a progress signal without ever moving progress backwards.
    pub fn record_progress(&mut self, progress: f64, waypoint_index: usize, distance_m: f64) {
        self.progress = self.progress.max(progress.clamp(0.0, 100.0));
        let last = self.waypoints.len().saturating_sub(1);
        self.current_waypoint_index = self.current_waypoint_index.max(waypoint_index.min(last));
        self.distance_traveled_m = self.distance_traveled_m.max(distance_m);
    }

    pub fn last_waypoint_index(&self) -> usize {
        self.waypoints.len().saturating_sub(1)
    }
}

/// Request body for creating a mission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMissionRequest {
    pub name: String,
    pub altitude_m: f64,
    pub speed_ms: f64,
    pub waypoints: Vec<Waypoint>,
}

impl CreateMissionRequest {
    /// Validate the request and return its waypoints ordered by sequence.
    pub fn validated_waypoints(&self) -> Result<Vec<Waypoint>, MissionError> {
        if !(self.speed_ms.is_finite() && self.speed_ms > 0.0) {
            return Err(MissionError::InvalidMission(format!(
                "speed_ms must be positive, got {}",
                self.speed_ms
            )));
        }
        if !self.altitude_m.is_finite() {
            return Err(MissionError::InvalidMission("altitude_m must be finite".into()));
        }

        let mut seen = HashSet::new();
        for wp in &self.waypoints {
            if !seen.insert(wp.sequence) {
                return Err(MissionError::InvalidMission(format!(
                    "duplicate waypoint sequence {}",
                    wp.sequence
                )));
            }
            if !(-90.0..=90.0).contains(&wp.latitude) || !(-180.0..=180.0).contains(&wp.longitude) {
                return Err(MissionError::InvalidMission(format!(
                    "waypoint {} is outside valid coordinates",
                    wp.sequence
                )));
            }
        }

        let mut waypoints = self.waypoints.clone();
        waypoints.sort_by_key(|wp| wp.sequence);
        Ok(waypoints)
    }
}

fn default_gps_fix() -> u8 {
    3
}

fn default_satellites() -> u8 {
    12
}

/// One timestamped snapshot of simulated or real flight state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    #[serde(default)]
    pub mission_id: MissionId,
    pub timestamp: DateTime<Utc>,
    #[serde(alias = "latitude")]
    pub lat: f64,
    #[serde(alias = "longitude")]
    pub lon: f64,
    pub altitude_m: f64,
    pub speed_ms: f64,
    pub battery_percent: f64,
    #[serde(default)]
    pub heading_deg: f64,
    #[serde(default)]
    pub roll_deg: f64,
    #[serde(default)]
    pub pitch_deg: f64,
    #[serde(default)]
    pub yaw_deg: f64,
    /// 0-1 no fix, 2 = 2D, 3 = 3D
    #[serde(default = "default_gps_fix")]
    pub gps_fix_type: u8,
    #[serde(default = "default_satellites")]
    pub satellites_visible: u8,
    #[serde(default)]
    pub ground_speed_ms: Option<f64>,
    #[serde(default)]
    pub vertical_speed_ms: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Anomaly,
    BatteryPrediction,
    FlightEfficiency,
}

impl InsightKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightKind::Anomaly => "anomaly",
            InsightKind::BatteryPrediction => "battery_prediction",
            InsightKind::FlightEfficiency => "flight_efficiency",
        }
    }
}

impl FromStr for InsightKind {
    type Err = MissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "anomaly" => Ok(InsightKind::Anomaly),
            "battery_prediction" => Ok(InsightKind::BatteryPrediction),
            "flight_efficiency" => Ok(InsightKind::FlightEfficiency),
            other => Err(MissionError::Storage(format!("unknown insight kind '{}'", other))),
        }
    }
}

/// Analysis output derived from one or more telemetry samples.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub mission_id: MissionId,
    pub timestamp: DateTime<Utc>,
    pub kind: InsightKind,
    pub confidence: f64,
    pub is_alert: bool,
    pub message: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = MissionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "INFO" => Ok(LogLevel::Info),
            "WARNING" | "WARN" => Ok(LogLevel::Warning),
            "ERROR" => Ok(LogLevel::Error),
            other => Err(MissionError::Storage(format!("unknown log level '{}'", other))),
        }
    }
}

/// Append-only record written on every mission transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionLogEntry {
    pub mission_id: MissionId,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

impl MissionLogEntry {
    pub fn info(mission_id: MissionId, message: impl Into<String>) -> Self {
        Self {
            mission_id,
            timestamp: Utc::now(),
            level: LogLevel::Info,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}
