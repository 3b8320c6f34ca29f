//! Telemetry history, external ingest and stream statistics.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use agcs_core::models::{MissionId, TelemetrySample};
use agcs_core::protocol::ProgressReport;

use super::error::ApiResult;
use crate::state::AppState;
use crate::telemetry::ChannelStats;

const DEFAULT_HISTORY_LIMIT: i64 = 100;
const MAX_HISTORY_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize, Default)]
pub struct HistoryQuery {
    offset: Option<i64>,
    limit: Option<i64>,
}

/// GET /v1/missions/:id/telemetry?offset=0&limit=100
pub async fn telemetry_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Json<Vec<TelemetrySample>>> {
    state.machine().get(id).await?;
    let offset = query.offset.unwrap_or(0).max(0);
    let limit = query
        .limit
        .unwrap_or(DEFAULT_HISTORY_LIMIT)
        .clamp(1, MAX_HISTORY_LIMIT);
    Ok(Json(state.channel().history(id, offset, limit).await?))
}

/// POST /v1/missions/:id/telemetry
///
/// Sample from a real drone link. The path id wins over any id in the body.
pub async fn ingest_telemetry(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
    Json(mut sample): Json<TelemetrySample>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    state.machine().get(id).await?;
    sample.mission_id = id;
    let observers = state.channel().publish_external(sample)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "observers": observers })),
    ))
}

/// POST /v1/missions/:id/progress
///
/// Route progress from a real drone link. Completes the mission once it
/// reports 100 % at the last waypoint.
pub async fn report_progress(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
    Json(report): Json<ProgressReport>,
) -> ApiResult<Json<Value>> {
    let outcome = state.machine().report_external_progress(id, report).await?;
    let mission = state.machine().get(id).await?;
    Ok(Json(json!({ "outcome": outcome, "mission": mission })))
}

/// GET /v1/stream/stats
pub async fn stream_stats(State(state): State<Arc<AppState>>) -> Json<ChannelStats> {
    Json(state.channel().stats())
}
