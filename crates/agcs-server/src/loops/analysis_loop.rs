//! Telemetry analysis loop.
//!
//! Consumes published samples from a bounded queue, scores them for
//! anomalies, periodically predicts battery drain and stores the resulting
//! insights. Alerts are broadcast to the mission's observers.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;
use tokio::time::interval;

use agcs_core::analysis::forest::{features, ForestParams};
use agcs_core::analysis::{predict_battery_drain, select_detector, IsolationForest};
use agcs_core::error::AnalysisError;
use agcs_core::models::{MissionId, TelemetrySample};
use agcs_core::protocol::StreamMessage;

use crate::persistence::insights as insights_db;
use crate::state::AppState;

const WINDOW_SIZE: usize = 512;
const STALE_SWEEP_SECS: u64 = 60;
const STALE_AFTER_SECS: u64 = 300;

/// One sample queued for analysis.
#[derive(Debug, Clone)]
pub struct AnalysisJob {
    pub sample: TelemetrySample,
}

struct MissionAnalysis {
    window: VecDeque<TelemetrySample>,
    model: Option<Arc<IsolationForest>>,
    training: bool,
    seen: usize,
    last_alerts: HashMap<String, Instant>,
    last_seen: Instant,
}

impl MissionAnalysis {
    fn new() -> Self {
        Self {
            window: VecDeque::with_capacity(WINDOW_SIZE),
            model: None,
            training: false,
            seen: 0,
            last_alerts: HashMap::new(),
            last_seen: Instant::now(),
        }
    }

    fn push(&mut self, sample: TelemetrySample) {
        if self.window.len() == WINDOW_SIZE {
            self.window.pop_front();
        }
        self.window.push_back(sample);
        self.seen += 1;
        self.last_seen = Instant::now();
    }

    /// True when an alert with this message is outside its cooldown.
    fn alert_allowed(&mut self, message: &str, cooldown: Duration, now: Instant) -> bool {
        match self.last_alerts.get(message) {
            Some(at) if now.saturating_duration_since(*at) < cooldown => false,
            _ => {
                self.last_alerts.insert(message.to_string(), now);
                true
            }
        }
    }
}

type TrainingResult = (MissionId, Result<IsolationForest, AnalysisError>);

pub async fn run_analysis_loop(
    state: Arc<AppState>,
    mut rx: mpsc::Receiver<AnalysisJob>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut missions: HashMap<MissionId, MissionAnalysis> = HashMap::new();
    let mut training: JoinSet<TrainingResult> = JoinSet::new();
    let mut sweep = interval(Duration::from_secs(STALE_SWEEP_SECS));

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Analysis loop shutting down");
                break;
            }
            maybe_job = rx.recv() => {
                let Some(job) = maybe_job else {
                    tracing::info!("Analysis channel closed");
                    break;
                };
                analyze_sample(&state, &mut missions, &mut training, job.sample).await;
            }
            Some(joined) = training.join_next(), if !training.is_empty() => {
                match joined {
                    Ok((mission_id, Ok(model))) => {
                        tracing::info!(
                            mission_id,
                            samples = model.training_size(),
                            "Anomaly model trained"
                        );
                        if let Some(entry) = missions.get_mut(&mission_id) {
                            entry.model = Some(Arc::new(model));
                            entry.training = false;
                        }
                    }
                    Ok((mission_id, Err(err))) => {
                        tracing::warn!(mission_id, "Anomaly model training skipped: {}", err);
                        if let Some(entry) = missions.get_mut(&mission_id) {
                            entry.training = false;
                        }
                    }
                    Err(err) => tracing::warn!("Anomaly model training task failed: {}", err),
                }
            }
            _ = sweep.tick() => {
                let cutoff = Duration::from_secs(STALE_AFTER_SECS);
                let before = missions.len();
                missions.retain(|_, entry| entry.training || entry.last_seen.elapsed() < cutoff);
                let removed = before - missions.len();
                if removed > 0 {
                    tracing::debug!(removed, "Dropped idle mission analysis state");
                }
            }
        }
    }

    training.abort_all();
}

async fn analyze_sample(
    state: &AppState,
    missions: &mut HashMap<MissionId, MissionAnalysis>,
    training: &mut JoinSet<TrainingResult>,
    sample: TelemetrySample,
) {
    let config = state.config();
    let mission_id = sample.mission_id;
    let timestamp = sample.timestamp;
    let entry = missions.entry(mission_id).or_insert_with(MissionAnalysis::new);
    entry.push(sample.clone());

    if entry.model.is_none() && !entry.training && entry.window.len() >= config.model_min_samples.max(2) {
        entry.training = true;
        let data: Vec<_> = entry.window.iter().map(features).collect();
        training.spawn_blocking(move || (mission_id, IsolationForest::fit(&data, ForestParams::default())));
    }

    let detector = select_detector(config.thresholds, entry.model.clone());
    let verdict = detector.evaluate(&sample, state.machine().commanded_speed(mission_id));
    if verdict.is_anomaly && entry.alert_allowed(&verdict.message(), config.alert_cooldown, Instant::now()) {
        let insight = verdict.into_insight(mission_id, timestamp);
        tracing::info!(mission_id, message = %insight.message, "Anomaly detected");
        if let Err(err) = insights_db::insert_insight(state.db().pool(), &insight).await {
            tracing::warn!(mission_id, "Failed to store anomaly insight: {}", err);
        }
        state.channel().broadcast(StreamMessage::alert(insight));
    }

    if entry.seen % config.battery_prediction_every != 0 {
        return;
    }
    let window: Vec<TelemetrySample> = entry.window.iter().cloned().collect();
    match predict_battery_drain(&window) {
        Ok(prediction) => {
            let insight = prediction.into_insight(mission_id, timestamp);
            if let Err(err) = insights_db::insert_insight(state.db().pool(), &insight).await {
                tracing::warn!(mission_id, "Failed to store battery prediction: {}", err);
            }
            if insight.is_alert && entry.alert_allowed(&insight.message, config.alert_cooldown, Instant::now()) {
                state.channel().broadcast(StreamMessage::alert(insight));
            }
        }
        Err(err) => tracing::debug!(mission_id, "Battery prediction skipped: {}", err),
    }
}
