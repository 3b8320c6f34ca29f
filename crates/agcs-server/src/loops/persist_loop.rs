//! Telemetry persistence loop.
//!
//! Batches samples and coalesces progress updates into periodic
//! transactional writes.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::interval;

use agcs_core::models::{MissionId, TelemetrySample};

use crate::backoff::RetryBackoff;
use crate::persistence::{missions as missions_db, telemetry as telemetry_db};
use crate::persistence::{Database, PersistItem, PersistQueue, ProgressUpdate};

const FLUSH_INTERVAL_MS: u64 = 500;
const DB_BACKOFF_MAX_SECS: u64 = 30;

#[derive(Default)]
struct Pending {
    samples: Vec<TelemetrySample>,
    progress: HashMap<MissionId, ProgressUpdate>,
}

impl Pending {
    fn is_empty(&self) -> bool {
        self.samples.is_empty() && self.progress.is_empty()
    }

    /// Absorb one queued item. Flush requests are returned to the caller.
    fn absorb(&mut self, item: PersistItem, acks: &mut Vec<oneshot::Sender<Result<(), String>>>) {
        match item {
            PersistItem::Sample(sample) => self.samples.push(sample),
            PersistItem::Progress(update) => {
                let newer = self
                    .progress
                    .get(&update.mission_id)
                    .map_or(true, |existing| update.distance_traveled_m >= existing.distance_traveled_m);
                if newer {
                    self.progress.insert(update.mission_id, update);
                }
            }
            PersistItem::Flush(ack) => acks.push(ack),
        }
    }

    fn restore(&mut self, batch: Pending) {
        let newer = std::mem::take(&mut self.samples);
        self.samples = batch.samples;
        self.samples.extend(newer);
        for (id, update) in batch.progress {
            self.progress.entry(id).or_insert(update);
        }
    }
}

pub async fn run_persist_loop(
    db: Database,
    queue: PersistQueue,
    mut rx: mpsc::Receiver<PersistItem>,
    mut shutdown: broadcast::Receiver<()>,
) {
    let mut ticker = interval(Duration::from_millis(FLUSH_INTERVAL_MS));
    let mut backoff = RetryBackoff::new(
        Duration::from_millis(FLUSH_INTERVAL_MS),
        Duration::from_secs(DB_BACKOFF_MAX_SECS),
    );
    let mut pending = Pending::default();

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Persistence loop shutting down");
                break;
            }
            maybe_item = rx.recv() => {
                let Some(item) = maybe_item else {
                    tracing::info!("Persistence channel closed");
                    break;
                };
                let mut acks = Vec::new();
                pending.absorb(item, &mut acks);
                drain_queue(&mut pending, &mut rx, &mut acks);
                merge_overflow(&queue, &mut pending, &mut acks);

                if !acks.is_empty() {
                    let outcome = flush_pending(&db, &mut pending).await.map_err(|err| err.to_string());
                    match &outcome {
                        Ok(()) => log_recovery(backoff.record_success()),
                        Err(err) => tracing::warn!("Requested persistence flush failed: {}", err),
                    }
                    for ack in acks {
                        let _ = ack.send(outcome.clone());
                    }
                }
            }
            _ = ticker.tick() => {
                let mut acks = Vec::new();
                merge_overflow(&queue, &mut pending, &mut acks);
                if !backoff.ready() && acks.is_empty() {
                    continue;
                }
                let outcome = flush_pending(&db, &mut pending).await;
                match &outcome {
                    Ok(()) => log_recovery(backoff.record_success()),
                    Err(err) => {
                        let delay = backoff.record_failure();
                        tracing::warn!(
                            failures = backoff.failures(),
                            "Telemetry persistence flush failed: {} (backing off {:?})",
                            err,
                            delay
                        );
                    }
                }
                let outcome = outcome.map_err(|err| err.to_string());
                for ack in acks {
                    let _ = ack.send(outcome.clone());
                }
            }
        }
    }

    let mut acks = Vec::new();
    drain_queue(&mut pending, &mut rx, &mut acks);
    merge_overflow(&queue, &mut pending, &mut acks);
    let outcome = flush_pending(&db, &mut pending).await.map_err(|err| err.to_string());
    if let Err(err) = &outcome {
        tracing::warn!("Telemetry persistence final flush failed: {}", err);
    }
    for ack in acks {
        let _ = ack.send(outcome.clone());
    }
}

fn log_recovery(failures: u32) {
    if failures > 0 {
        tracing::info!(failures, "Telemetry persistence recovered");
    }
}

fn drain_queue(
    pending: &mut Pending,
    rx: &mut mpsc::Receiver<PersistItem>,
    acks: &mut Vec<oneshot::Sender<Result<(), String>>>,
) {
    while let Ok(item) = rx.try_recv() {
        pending.absorb(item, acks);
    }
}

fn merge_overflow(
    queue: &PersistQueue,
    pending: &mut Pending,
    acks: &mut Vec<oneshot::Sender<Result<(), String>>>,
) {
    for item in queue.take_overflow() {
        pending.absorb(item, acks);
    }
}

async fn flush_pending(db: &Database, pending: &mut Pending) -> Result<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let batch = std::mem::take(pending);
    let mut tx = match db.pool().begin().await {
        Ok(tx) => tx,
        Err(err) => {
            pending.restore(batch);
            return Err(err.into());
        }
    };

    let mut write_error: Option<anyhow::Error> = None;
    for sample in &batch.samples {
        if let Err(err) = telemetry_db::insert_sample_tx(&mut tx, sample).await {
            write_error = Some(err);
            break;
        }
    }
    if write_error.is_none() {
        for update in batch.progress.values() {
            if let Err(err) = missions_db::update_progress_tx(&mut tx, update).await {
                write_error = Some(err);
                break;
            }
        }
    }

    if let Some(err) = write_error {
        tx.rollback().await.ok();
        pending.restore(batch);
        return Err(err);
    }

    if let Err(err) = tx.commit().await {
        pending.restore(batch);
        return Err(err.into());
    }

    tracing::debug!(
        samples = batch.samples.len(),
        missions = batch.progress.len(),
        "Flushed telemetry batch"
    );
    Ok(())
}
