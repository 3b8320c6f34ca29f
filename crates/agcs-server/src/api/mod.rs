//! HTTP and WebSocket API for the mission server.

pub mod error;
pub mod missions;
pub mod telemetry;
pub mod ws;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/v1/missions", get(missions::list_missions).post(missions::create_mission))
        .route("/v1/missions/:id", get(missions::get_mission))
        .route("/v1/missions/:id/start", post(missions::start_mission))
        .route("/v1/missions/:id/pause", post(missions::pause_mission))
        .route("/v1/missions/:id/resume", post(missions::resume_mission))
        .route("/v1/missions/:id/abort", post(missions::abort_mission))
        .route("/v1/missions/:id/logs", get(missions::list_logs))
        .route("/v1/missions/:id/insights", get(missions::list_insights))
        .route("/v1/missions/:id/battery-prediction", post(missions::battery_prediction))
        .route("/v1/missions/:id/efficiency", get(missions::flight_efficiency))
        .route(
            "/v1/missions/:id/telemetry",
            get(telemetry::telemetry_history).post(telemetry::ingest_telemetry),
        )
        .route("/v1/missions/:id/progress", post(telemetry::report_progress))
        .route("/v1/missions/:id/stream", get(ws::stream_handler))
        .route("/v1/stream/stats", get(telemetry::stream_stats))
}
