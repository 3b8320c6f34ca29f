//! Mission CRUD, lifecycle commands and per-mission analysis endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::Deserialize;

use agcs_core::analysis::{analyze_efficiency, predict_battery_drain, BatteryPrediction, FlightEfficiency};
use agcs_core::models::{
    CreateMissionRequest, Insight, InsightKind, LogLevel, Mission, MissionId, MissionLogEntry,
};

use super::error::{ApiError, ApiResult};
use crate::persistence::{insights as insights_db, logs as logs_db};
use crate::state::AppState;

const DEFAULT_LIST_LIMIT: i64 = 100;
const MAX_LIST_LIMIT: i64 = 1000;
const DEFAULT_PREDICTION_WINDOW: i64 = 100;
const EFFICIENCY_SAMPLE_LIMIT: i64 = 100_000;

fn clamp_limit(limit: Option<i64>, default: i64) -> i64 {
    limit.unwrap_or(default).clamp(1, MAX_LIST_LIMIT)
}

/// POST /v1/missions
pub async fn create_mission(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CreateMissionRequest>,
) -> ApiResult<(StatusCode, Json<Mission>)> {
    let mission = state.machine().create(request).await?;
    Ok((StatusCode::CREATED, Json(mission)))
}

/// GET /v1/missions
pub async fn list_missions(State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Mission>>> {
    Ok(Json(state.machine().list().await?))
}

/// GET /v1/missions/:id
pub async fn get_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
) -> ApiResult<Json<Mission>> {
    Ok(Json(state.machine().get(id).await?))
}

pub async fn start_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
) -> ApiResult<Json<Mission>> {
    Ok(Json(state.machine().start(id).await?))
}

pub async fn pause_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
) -> ApiResult<Json<Mission>> {
    Ok(Json(state.machine().pause(id).await?))
}

pub async fn resume_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
) -> ApiResult<Json<Mission>> {
    Ok(Json(state.machine().resume(id).await?))
}

pub async fn abort_mission(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
) -> ApiResult<Json<Mission>> {
    Ok(Json(state.machine().abort(id).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct LogQuery {
    level: Option<String>,
    limit: Option<i64>,
}

/// GET /v1/missions/:id/logs?level=WARNING&limit=50
pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
    Query(query): Query<LogQuery>,
) -> ApiResult<Json<Vec<MissionLogEntry>>> {
    state.machine().get(id).await?;
    let level = query
        .level
        .as_deref()
        .map(|raw| raw.parse::<LogLevel>())
        .transpose()
        .map_err(|_| ApiError::BadRequest("level must be INFO, WARNING or ERROR".into()))?;
    let limit = clamp_limit(query.limit, DEFAULT_LIST_LIMIT);
    Ok(Json(logs_db::list_logs(state.db().pool(), id, level, limit).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct InsightQuery {
    kind: Option<String>,
    limit: Option<i64>,
}

/// GET /v1/missions/:id/insights?kind=anomaly
pub async fn list_insights(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
    Query(query): Query<InsightQuery>,
) -> ApiResult<Json<Vec<Insight>>> {
    state.machine().get(id).await?;
    let kind = query
        .kind
        .as_deref()
        .map(|raw| raw.parse::<InsightKind>())
        .transpose()
        .map_err(|_| {
            ApiError::BadRequest("kind must be anomaly, battery_prediction or flight_efficiency".into())
        })?;
    let limit = clamp_limit(query.limit, DEFAULT_LIST_LIMIT);
    Ok(Json(insights_db::list_insights(state.db().pool(), id, kind, limit).await?))
}

#[derive(Debug, Deserialize, Default)]
pub struct PredictionQuery {
    window: Option<i64>,
}

/// POST /v1/missions/:id/battery-prediction
///
/// Fits the most recent samples and stores the prediction as an insight.
pub async fn battery_prediction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
    Query(query): Query<PredictionQuery>,
) -> ApiResult<Json<BatteryPrediction>> {
    state.machine().get(id).await?;
    let window = clamp_limit(query.window, DEFAULT_PREDICTION_WINDOW);
    let samples = state.channel().recent(id, window).await?;
    let prediction = predict_battery_drain(&samples)?;

    let insight = prediction.clone().into_insight(id, Utc::now());
    insights_db::insert_insight(state.db().pool(), &insight).await?;
    Ok(Json(prediction))
}

/// GET /v1/missions/:id/efficiency
///
/// Compares the flown track with the plan and stores the report as an
/// insight.
pub async fn flight_efficiency(
    State(state): State<Arc<AppState>>,
    Path(id): Path<MissionId>,
) -> ApiResult<Json<FlightEfficiency>> {
    let mission = state.machine().get(id).await?;
    let samples = state.channel().history(id, 0, EFFICIENCY_SAMPLE_LIMIT).await?;
    let efficiency = analyze_efficiency(&samples, &mission.waypoints)?;

    let insight = efficiency.clone().into_insight(id, Utc::now());
    insights_db::insert_insight(state.db().pool(), &insight).await?;
    Ok(Json(efficiency))
}
