//! Background loops for continuous processing.

pub mod analysis_loop;
pub mod observer_sweep_loop;
pub mod persist_loop;

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::state::{AppState, BackgroundQueues};

/// Spawn every background loop. Each one exits on the shutdown signal.
pub fn spawn_all(
    state: &Arc<AppState>,
    queues: BackgroundQueues,
    shutdown_tx: &broadcast::Sender<()>,
) -> Vec<JoinHandle<()>> {
    let BackgroundQueues {
        persist,
        persist_rx,
        analysis_rx,
    } = queues;

    vec![
        tokio::spawn(persist_loop::run_persist_loop(
            state.db().clone(),
            persist,
            persist_rx,
            shutdown_tx.subscribe(),
        )),
        tokio::spawn(analysis_loop::run_analysis_loop(
            state.clone(),
            analysis_rx,
            shutdown_tx.subscribe(),
        )),
        tokio::spawn(observer_sweep_loop::run_observer_sweep_loop(
            state.clone(),
            shutdown_tx.subscribe(),
        )),
    ]
}
