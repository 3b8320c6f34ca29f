//! Evicts observers that stopped receiving.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::state::AppState;

const MIN_SWEEP_MS: u64 = 250;

pub async fn run_observer_sweep_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let idle = state.config().observer_idle;
    let period = (idle / 4).max(Duration::from_millis(MIN_SWEEP_MS));
    let mut ticker = interval(period);

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Observer sweep loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let evicted = state.channel().evict_idle(idle);
                for (mission_id, observer_id) in &evicted {
                    tracing::info!(mission_id, observer_id, "Evicted idle observer");
                }
            }
        }
    }
}
