//! Live mission stream over WebSocket.

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use reqwest::Url;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use agcs_core::models::{MissionId, TelemetrySample};
use agcs_core::protocol::{ClientMessage, ProgressReport, StreamMessage};

/// Observer connection to one mission's stream.
pub struct MissionStream {
    mission_id: MissionId,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl MissionStream {
    pub(crate) async fn connect(url: &str, mission_id: MissionId) -> Result<Self> {
        let (socket, _) = connect_async(url).await?;
        tracing::debug!(mission_id, "Mission stream connected");
        Ok(Self { mission_id, socket })
    }

    pub fn mission_id(&self) -> MissionId {
        self.mission_id
    }

    /// Read the next envelope (returns None on close).
    ///
    /// Frames that do not decode are skipped.
    pub async fn next_message(&mut self) -> Result<Option<StreamMessage>> {
        while let Some(msg) = self.socket.next().await {
            match msg? {
                Message::Text(text) => match serde_json::from_str(&text) {
                    Ok(envelope) => return Ok(Some(envelope)),
                    Err(err) => tracing::warn!("Skipping undecodable stream frame: {}", err),
                },
                Message::Close(_) => return Ok(None),
                _ => {}
            }
        }
        Ok(None)
    }

    /// Push a drone-link sample through the stream socket.
    pub async fn send_telemetry(&mut self, sample: TelemetrySample) -> Result<()> {
        self.send(&ClientMessage::Telemetry { data: sample }).await
    }

    /// Push drone-link route progress through the stream socket.
    pub async fn send_progress(&mut self, report: ProgressReport) -> Result<()> {
        self.send(&ClientMessage::MissionStatus { data: report }).await
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.send(&ClientMessage::Ping).await
    }

    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let text = serde_json::to_string(msg)?;
        self.socket.send(Message::Text(text)).await?;
        Ok(())
    }

    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }
}

pub(crate) fn build_ws_url(base: &str, path: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => other,
    }
    .to_string();

    url.set_scheme(&scheme)
        .map_err(|_| anyhow::anyhow!("Invalid base URL scheme"))?;
    url.set_path(path);
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_becomes_ws() {
        let url = build_ws_url("http://localhost:3000", "/v1/missions/7/stream").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3000/v1/missions/7/stream");
    }

    #[test]
    fn https_becomes_wss() {
        let url = build_ws_url("https://agcs.example.com", "/v1/missions/1/stream").unwrap();
        assert_eq!(url.as_str(), "wss://agcs.example.com/v1/missions/1/stream");
    }
}
