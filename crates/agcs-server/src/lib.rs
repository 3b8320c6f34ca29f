//! Mission execution and telemetry server.

pub mod api;
pub mod backoff;
pub mod config;
pub mod loops;
pub mod mission;
pub mod persistence;
pub mod state;
pub mod telemetry;
