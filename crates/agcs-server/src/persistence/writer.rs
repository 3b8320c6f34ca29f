//! Non-blocking handoff from the telemetry hot path to the persistence loop.

use anyhow::{anyhow, Result};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{mpsc, oneshot};

use agcs_core::models::TelemetrySample;

use super::missions::ProgressUpdate;

pub enum PersistItem {
    Sample(TelemetrySample),
    Progress(ProgressUpdate),
    /// Write everything queued so far, then acknowledge with the outcome.
    Flush(oneshot::Sender<Result<(), String>>),
}

/// Cloneable producer side of the persistence writer.
///
/// Enqueueing never blocks: when the channel is full, items spill into an
/// overflow buffer that the loop merges on its next pass.
#[derive(Clone)]
pub struct PersistQueue {
    tx: mpsc::Sender<PersistItem>,
    overflow: Arc<Mutex<Vec<PersistItem>>>,
}

impl PersistQueue {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<PersistItem>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                tx,
                overflow: Arc::new(Mutex::new(Vec::new())),
            },
            rx,
        )
    }

    pub fn enqueue_sample(&self, sample: TelemetrySample) {
        self.enqueue(PersistItem::Sample(sample));
    }

    pub fn enqueue_progress(&self, update: ProgressUpdate) {
        self.enqueue(PersistItem::Progress(update));
    }

    fn enqueue(&self, item: PersistItem) {
        match self.tx.try_send(item) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(item)) => {
                self.overflow
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(item);
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::warn!("Persistence writer closed; dropping queued item");
            }
        }
    }

    /// Wait until everything enqueued before this call has been written.
    pub async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(PersistItem::Flush(ack_tx))
            .await
            .map_err(|_| anyhow!("persistence writer is not running"))?;
        ack_rx
            .await
            .map_err(|_| anyhow!("persistence writer dropped flush request"))?
            .map_err(|err| anyhow!("persistence flush failed: {}", err))
    }

    pub fn take_overflow(&self) -> Vec<PersistItem> {
        std::mem::take(&mut *self.overflow.lock().unwrap_or_else(PoisonError::into_inner))
    }
}
