//! AGCS SDK - mission server client library
//!
//! Wraps the REST API for mission control and the per-mission WebSocket
//! stream for live telemetry.

pub mod client;
pub mod stream;

pub use agcs_core::models::{Mission, TelemetrySample};
pub use agcs_core::protocol::StreamMessage;
pub use client::{AgcsClient, ApiError};
pub use stream::MissionStream;
