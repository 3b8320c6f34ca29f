//! AGCS CLI - command line tools for the mission server.
//!
//! Binaries:
//! - run_mission: plan a field survey, start it and watch the live stream
//! - send_telemetry: replay a mission route as an external drone link

pub mod survey;

pub use survey::{offset_position, serpentine, SurveyArea};
