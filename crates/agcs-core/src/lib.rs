pub mod analysis;
pub mod error;
pub mod lifecycle;
pub mod models;
pub mod path;
pub mod protocol;
pub mod simulation;

pub use analysis::{
    analyze_efficiency, predict_battery_drain, select_detector, AnomalyThresholds,
    BatteryPrediction, Detector, FlightEfficiency, IsolationForest, RuleBasedDetector, Verdict,
};
pub use error::{AnalysisError, MissionError};
pub use lifecycle::{check_transition, MissionCommand};
pub use models::{
    CreateMissionRequest, Insight, InsightKind, LogLevel, Mission, MissionId, MissionLogEntry,
    MissionStatus, TelemetrySample, Waypoint,
};
pub use path::{bearing, distance, haversine_distance, interpolate, total_distance, GeoPoint};
pub use protocol::{ClientMessage, MissionUpdate, ProgressReport, StreamMessage};
pub use simulation::{FlightSimulator, JitterSettings, SimSnapshot, SimStep, SimulationParams};
