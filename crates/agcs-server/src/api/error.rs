//! HTTP error mapping.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use agcs_core::error::{AnalysisError, MissionError};

#[derive(Debug)]
pub enum ApiError {
    Mission(MissionError),
    Analysis(AnalysisError),
    BadRequest(String),
    Internal(anyhow::Error),
}

impl From<MissionError> for ApiError {
    fn from(err: MissionError) -> Self {
        ApiError::Mission(err)
    }
}

impl From<AnalysisError> for ApiError {
    fn from(err: AnalysisError) -> Self {
        ApiError::Analysis(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Mission(err) => {
                let status = match &err {
                    MissionError::NotFound(_) => StatusCode::NOT_FOUND,
                    MissionError::InvalidTransition { .. } | MissionError::AlreadyRunning(_) => {
                        StatusCode::CONFLICT
                    }
                    MissionError::InsufficientWaypoints { .. } | MissionError::InvalidMission(_) => {
                        StatusCode::UNPROCESSABLE_ENTITY
                    }
                    MissionError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                if status == StatusCode::INTERNAL_SERVER_ERROR {
                    tracing::error!("Mission storage failure: {}", err);
                }
                (status, Json(json!({ "error": err.code(), "message": err.to_string() }))).into_response()
            }
            ApiError::Analysis(err) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({
                    "error": err.code(),
                    "message": err.to_string(),
                    "confidence": err.confidence(),
                })),
            )
                .into_response(),
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                Json(json!({ "error": "bad_request", "message": message })),
            )
                .into_response(),
            ApiError::Internal(err) => {
                tracing::error!("Request failed: {:#}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal", "message": "internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
