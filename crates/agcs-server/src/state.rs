//! Shared server state.

use std::sync::Arc;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::loops::analysis_loop::AnalysisJob;
use crate::mission::{MissionStateMachine, WorkerSettings};
use crate::persistence::{Database, PersistItem, PersistQueue};
use crate::telemetry::TelemetryChannel;

/// Receivers for the background loops, handed to `loops::spawn_all`.
pub struct BackgroundQueues {
    pub persist: PersistQueue,
    pub persist_rx: mpsc::Receiver<PersistItem>,
    pub analysis_rx: mpsc::Receiver<AnalysisJob>,
}

pub struct AppState {
    config: Config,
    db: Database,
    channel: TelemetryChannel,
    machine: Arc<MissionStateMachine>,
}

impl AppState {
    pub fn build(config: Config, db: Database) -> (Arc<Self>, BackgroundQueues) {
        let (persist, persist_rx) = PersistQueue::channel(config.persist_queue_capacity);
        let (analysis_tx, analysis_rx) = mpsc::channel(config.analysis_queue_capacity);

        let channel = TelemetryChannel::new(
            db.clone(),
            persist.clone(),
            analysis_tx,
            config.observer_queue_capacity,
        );
        let machine = Arc::new(MissionStateMachine::new(
            db.clone(),
            channel.clone(),
            persist.clone(),
            WorkerSettings::from_config(&config),
        ));

        let state = Arc::new(Self {
            config,
            db,
            channel,
            machine,
        });
        let queues = BackgroundQueues {
            persist,
            persist_rx,
            analysis_rx,
        };
        (state, queues)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn channel(&self) -> &TelemetryChannel {
        &self.channel
    }

    pub fn machine(&self) -> &Arc<MissionStateMachine> {
        &self.machine
    }
}
