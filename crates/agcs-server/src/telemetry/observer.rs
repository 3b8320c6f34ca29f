//! Observer handles on a mission's broadcast channel.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::sync::watch;

use agcs_core::models::MissionId;
use agcs_core::protocol::StreamMessage;

use super::channel::TelemetryChannel;

pub type ObserverId = u64;

/// Per-observer bookkeeping shared between the channel registry and the
/// observer's `Subscription`.
#[derive(Debug)]
pub(crate) struct ObserverActivity {
    last_activity: Mutex<Instant>,
    dropped: AtomicU64,
}

impl ObserverActivity {
    pub(crate) fn new() -> Self {
        Self {
            last_activity: Mutex::new(Instant::now()),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn touch(&self) {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Instant::now();
    }

    pub(crate) fn last_activity(&self) -> Instant {
        *self
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add_dropped(&self, count: u64) {
        self.dropped.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// Handle held by one observer connection. Dropping it unsubscribes.
///
/// A slow observer lags behind the mission's broadcast buffer; the skipped
/// (oldest) messages are counted as dropped and delivery resumes with the
/// oldest message still buffered.
pub struct Subscription {
    id: ObserverId,
    mission_id: MissionId,
    rx: broadcast::Receiver<Arc<StreamMessage>>,
    closed: watch::Receiver<bool>,
    activity: Arc<ObserverActivity>,
    channel: TelemetryChannel,
}

impl Subscription {
    pub(crate) fn new(
        id: ObserverId,
        mission_id: MissionId,
        rx: broadcast::Receiver<Arc<StreamMessage>>,
        closed: watch::Receiver<bool>,
        activity: Arc<ObserverActivity>,
        channel: TelemetryChannel,
    ) -> Self {
        Self {
            id,
            mission_id,
            rx,
            closed,
            activity,
            channel,
        }
    }

    pub fn id(&self) -> ObserverId {
        self.id
    }

    pub fn mission_id(&self) -> MissionId {
        self.mission_id
    }

    /// Next message in publish order. `None` once the subscription has been
    /// closed (unsubscribed, evicted or server shutdown).
    pub async fn recv(&mut self) -> Option<Arc<StreamMessage>> {
        loop {
            if self.is_closed() {
                return None;
            }
            tokio::select! {
                biased;

                changed = self.closed.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
                result = self.rx.recv() => match result {
                    Ok(msg) => {
                        self.activity.touch();
                        return Some(msg);
                    }
                    Err(RecvError::Lagged(skipped)) => self.record_lag(skipped),
                    Err(RecvError::Closed) => return None,
                },
            }
        }
    }

    pub fn try_recv(&mut self) -> Option<Arc<StreamMessage>> {
        if self.is_closed() {
            return None;
        }
        loop {
            match self.rx.try_recv() {
                Ok(msg) => {
                    self.activity.touch();
                    return Some(msg);
                }
                Err(TryRecvError::Lagged(skipped)) => self.record_lag(skipped),
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    }

    fn record_lag(&self, skipped: u64) {
        self.activity.add_dropped(skipped);
        self.channel.record_dropped(skipped);
        tracing::debug!(
            mission_id = self.mission_id,
            observer_id = self.id,
            skipped,
            dropped = self.activity.dropped(),
            "Observer lagged; dropped oldest messages"
        );
    }

    /// Record liveness (heartbeat reply or client ping).
    pub fn touch(&self) {
        self.activity.touch();
    }

    pub fn dropped(&self) -> u64 {
        self.activity.dropped()
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow() || self.closed.has_changed().is_err()
    }

    /// Remove this observer from the channel. Safe to call more than once.
    pub fn unsubscribe(&self) -> bool {
        self.channel.unsubscribe(self.mission_id, self.id)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.unsubscribe(self.mission_id, self.id);
    }
}
