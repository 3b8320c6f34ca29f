//! REST client for mission control and telemetry.

use anyhow::Result;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use agcs_core::analysis::{BatteryPrediction, FlightEfficiency};
use agcs_core::lifecycle::MissionCommand;
use agcs_core::protocol::ProgressReport;
use agcs_core::models::{
    CreateMissionRequest, Insight, InsightKind, LogLevel, Mission, MissionId, MissionLogEntry,
    TelemetrySample,
};

use crate::stream::{build_ws_url, MissionStream};

/// Error body returned by the server for rejected requests.
#[derive(Debug, Clone, Error)]
#[error("{status} {code}: {message}")]
pub struct ApiError {
    pub status: u16,
    /// Machine-readable code such as `invalid_transition`.
    pub code: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
struct ProgressAck {
    mission: Mission,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    message: String,
}

/// Client for connecting to the AGCS server.
#[derive(Clone)]
pub struct AgcsClient {
    pub(crate) base_url: String,
    pub(crate) client: reqwest::Client,
}

impl AgcsClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Decode a JSON response, turning error statuses into [`ApiError`].
    async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let text = response.text().await.unwrap_or_default();
        let err = match serde_json::from_str::<ErrorBody>(&text) {
            Ok(body) => ApiError {
                status: status.as_u16(),
                code: body.error,
                message: body.message,
            },
            Err(_) => ApiError {
                status: status.as_u16(),
                code: "http".to_string(),
                message: text,
            },
        };
        Err(err.into())
    }

    pub async fn create_mission(&self, request: &CreateMissionRequest) -> Result<Mission> {
        let response = self
            .client
            .post(self.url("/v1/missions"))
            .json(request)
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn list_missions(&self) -> Result<Vec<Mission>> {
        let response = self.client.get(self.url("/v1/missions")).send().await?;
        Self::decode(response).await
    }

    pub async fn get_mission(&self, id: MissionId) -> Result<Mission> {
        let response = self
            .client
            .get(self.url(&format!("/v1/missions/{}", id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Issue a lifecycle command and return the updated mission.
    pub async fn command(&self, id: MissionId, command: MissionCommand) -> Result<Mission> {
        let response = self
            .client
            .post(self.url(&format!("/v1/missions/{}/{}", id, command.as_str())))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn start(&self, id: MissionId) -> Result<Mission> {
        self.command(id, MissionCommand::Start).await
    }

    pub async fn pause(&self, id: MissionId) -> Result<Mission> {
        self.command(id, MissionCommand::Pause).await
    }

    pub async fn resume(&self, id: MissionId) -> Result<Mission> {
        self.command(id, MissionCommand::Resume).await
    }

    pub async fn abort(&self, id: MissionId) -> Result<Mission> {
        self.command(id, MissionCommand::Abort).await
    }

    pub async fn telemetry_history(
        &self,
        id: MissionId,
        offset: i64,
        limit: i64,
    ) -> Result<Vec<TelemetrySample>> {
        let response = self
            .client
            .get(self.url(&format!("/v1/missions/{}/telemetry", id)))
            .query(&[("offset", offset), ("limit", limit)])
            .send()
            .await?;
        Self::decode(response).await
    }

    /// Send one sample from a real drone link.
    pub async fn send_telemetry(&self, id: MissionId, sample: &TelemetrySample) -> Result<()> {
        let response = self
            .client
            .post(self.url(&format!("/v1/missions/{}/telemetry", id)))
            .json(sample)
            .send()
            .await?;
        Self::decode::<serde_json::Value>(response).await?;
        Ok(())
    }

    /// Report route progress from a real drone link. Returns the mission as
    /// recorded, `completed` once the last waypoint is reached at 100 %.
    pub async fn report_progress(&self, id: MissionId, report: &ProgressReport) -> Result<Mission> {
        let response = self
            .client
            .post(self.url(&format!("/v1/missions/{}/progress", id)))
            .json(report)
            .send()
            .await?;
        Ok(Self::decode::<ProgressAck>(response).await?.mission)
    }

    pub async fn logs(&self, id: MissionId, level: Option<LogLevel>) -> Result<Vec<MissionLogEntry>> {
        let mut request = self.client.get(self.url(&format!("/v1/missions/{}/logs", id)));
        if let Some(level) = level {
            request = request.query(&[("level", level.as_str())]);
        }
        Self::decode(request.send().await?).await
    }

    pub async fn insights(&self, id: MissionId, kind: Option<InsightKind>) -> Result<Vec<Insight>> {
        let mut request = self
            .client
            .get(self.url(&format!("/v1/missions/{}/insights", id)));
        if let Some(kind) = kind {
            request = request.query(&[("kind", kind.as_str())]);
        }
        Self::decode(request.send().await?).await
    }

    pub async fn battery_prediction(&self, id: MissionId) -> Result<BatteryPrediction> {
        let response = self
            .client
            .post(self.url(&format!("/v1/missions/{}/battery-prediction", id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn efficiency(&self, id: MissionId) -> Result<FlightEfficiency> {
        let response = self
            .client
            .get(self.url(&format!("/v1/missions/{}/efficiency", id)))
            .send()
            .await?;
        Self::decode(response).await
    }

    pub async fn stream_stats(&self) -> Result<serde_json::Value> {
        let response = self.client.get(self.url("/v1/stream/stats")).send().await?;
        Self::decode(response).await
    }

    /// Open the live observer stream for a mission.
    pub async fn connect_stream(&self, id: MissionId) -> Result<MissionStream> {
        let url = build_ws_url(&self.base_url, &format!("/v1/missions/{}/stream", id))?;
        MissionStream::connect(url.as_str(), id).await
    }
}
