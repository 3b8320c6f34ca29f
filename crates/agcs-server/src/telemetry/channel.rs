//! Per-mission telemetry broadcast hub.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};

use agcs_core::error::MissionError;
use agcs_core::models::{MissionId, TelemetrySample};
use agcs_core::protocol::StreamMessage;

use super::observer::{ObserverActivity, ObserverId, Subscription};
use crate::loops::analysis_loop::AnalysisJob;
use crate::persistence::{telemetry as telemetry_db, Database, PersistQueue};

#[derive(Debug, Clone, Serialize)]
pub struct MissionObservers {
    pub mission_id: MissionId,
    pub observers: usize,
    /// Messages not yet received by every observer.
    pub buffered: usize,
    pub dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub total_observers: usize,
    pub published: u64,
    pub dropped_messages: u64,
    pub evicted_observers: u64,
    pub dropped_analysis_jobs: u64,
    pub missions: Vec<MissionObservers>,
}

/// One observer as seen by the channel.
struct ObserverEntry {
    activity: Arc<ObserverActivity>,
    close: watch::Sender<bool>,
}

/// Broadcast buffer and observers of one mission.
struct MissionTopic {
    sender: broadcast::Sender<Arc<StreamMessage>>,
    observers: HashMap<ObserverId, ObserverEntry>,
}

struct ChannelInner {
    db: Database,
    persist: PersistQueue,
    analysis_tx: mpsc::Sender<AnalysisJob>,
    topics: DashMap<MissionId, MissionTopic>,
    observer_capacity: usize,
    next_observer_id: AtomicU64,
    published: AtomicU64,
    dropped_messages: AtomicU64,
    evicted_observers: AtomicU64,
    dropped_analysis_jobs: AtomicU64,
}

/// Accepts samples, hands them to persistence and analysis, and fans them
/// out to every observer of the mission over a per-mission broadcast
/// channel. Publishing never blocks and never fails because of an observer.
#[derive(Clone)]
pub struct TelemetryChannel {
    inner: Arc<ChannelInner>,
}

impl TelemetryChannel {
    /// `observer_capacity` bounds how far one observer may fall behind.
    /// The broadcast buffer rounds it up to a power of two.
    pub fn new(
        db: Database,
        persist: PersistQueue,
        analysis_tx: mpsc::Sender<AnalysisJob>,
        observer_capacity: usize,
    ) -> Self {
        Self {
            inner: Arc::new(ChannelInner {
                db,
                persist,
                analysis_tx,
                topics: DashMap::new(),
                observer_capacity: observer_capacity.max(1),
                next_observer_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                dropped_messages: AtomicU64::new(0),
                evicted_observers: AtomicU64::new(0),
                dropped_analysis_jobs: AtomicU64::new(0),
            }),
        }
    }

    /// Publish a sample produced by the simulator. Returns the number of
    /// observers it was buffered for.
    pub fn publish(&self, sample: TelemetrySample) -> usize {
        let inner = &self.inner;
        inner.published.fetch_add(1, Ordering::Relaxed);
        inner.persist.enqueue_sample(sample.clone());

        let mission_id = sample.mission_id;
        let delivered = self.fan_out(mission_id, Arc::new(StreamMessage::telemetry(sample.clone())));

        match inner.analysis_tx.try_send(AnalysisJob { sample }) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                inner.dropped_analysis_jobs.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(mission_id, "Analysis queue full; dropping sample from analysis");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(mission_id, "Analysis loop not running");
            }
        }

        delivered
    }

    /// Publish a sample from a real drone link.
    pub fn publish_external(&self, sample: TelemetrySample) -> Result<usize, MissionError> {
        if !(-90.0..=90.0).contains(&sample.lat) || !(-180.0..=180.0).contains(&sample.lon) {
            return Err(MissionError::InvalidMission(format!(
                "telemetry position ({}, {}) is outside valid coordinates",
                sample.lat, sample.lon
            )));
        }
        if !(sample.altitude_m.is_finite() && sample.speed_ms.is_finite() && sample.battery_percent.is_finite()) {
            return Err(MissionError::InvalidMission("telemetry values must be finite".into()));
        }
        tracing::debug!(mission_id = sample.mission_id, "External telemetry received");
        Ok(self.publish(sample))
    }

    /// Fan out a non-sample envelope. Not persisted as telemetry.
    pub fn broadcast(&self, msg: StreamMessage) -> usize {
        self.fan_out(msg.mission_id(), Arc::new(msg))
    }

    fn fan_out(&self, mission_id: MissionId, msg: Arc<StreamMessage>) -> usize {
        match self.inner.topics.get(&mission_id) {
            Some(topic) => topic.sender.send(msg).unwrap_or(0),
            None => 0,
        }
    }

    pub(crate) fn record_dropped(&self, count: u64) {
        self.inner.dropped_messages.fetch_add(count, Ordering::Relaxed);
    }

    pub fn subscribe(&self, mission_id: MissionId) -> Subscription {
        let id = self.inner.next_observer_id.fetch_add(1, Ordering::Relaxed);
        let activity = Arc::new(ObserverActivity::new());
        let (close, closed) = watch::channel(false);

        let rx = {
            let mut topic = self
                .inner
                .topics
                .entry(mission_id)
                .or_insert_with(|| MissionTopic {
                    sender: broadcast::channel(self.inner.observer_capacity).0,
                    observers: HashMap::new(),
                });
            topic.observers.insert(
                id,
                ObserverEntry {
                    activity: activity.clone(),
                    close,
                },
            );
            topic.sender.subscribe()
        };
        tracing::debug!(mission_id, observer_id = id, "Observer subscribed");
        Subscription::new(id, mission_id, rx, closed, activity, self.clone())
    }

    /// Remove an observer and signal its subscription to end. Returns false
    /// if it was already gone.
    pub fn unsubscribe(&self, mission_id: MissionId, observer_id: ObserverId) -> bool {
        let removed = self
            .inner
            .topics
            .get_mut(&mission_id)
            .and_then(|mut topic| topic.observers.remove(&observer_id));
        self.inner
            .topics
            .remove_if(&mission_id, |_, topic| topic.observers.is_empty());

        match removed {
            Some(entry) => {
                entry.close.send_replace(true);
                tracing::debug!(mission_id, observer_id, "Observer unsubscribed");
                true
            }
            None => false,
        }
    }

    pub fn observer_count(&self, mission_id: MissionId) -> usize {
        self.inner
            .topics
            .get(&mission_id)
            .map(|topic| topic.observers.len())
            .unwrap_or(0)
    }

    /// Persisted samples in timestamp order, including everything published
    /// before this call.
    pub async fn history(
        &self,
        mission_id: MissionId,
        offset: i64,
        limit: i64,
    ) -> anyhow::Result<Vec<TelemetrySample>> {
        self.inner.persist.flush().await?;
        telemetry_db::load_history(self.inner.db.pool(), mission_id, offset, limit).await
    }

    /// The most recent `limit` persisted samples, oldest first.
    pub async fn recent(&self, mission_id: MissionId, limit: i64) -> anyhow::Result<Vec<TelemetrySample>> {
        self.inner.persist.flush().await?;
        telemetry_db::load_recent(self.inner.db.pool(), mission_id, limit).await
    }

    /// Evict observers with no delivery since `now - window`.
    pub fn evict_idle_at(&self, now: Instant, window: Duration) -> Vec<(MissionId, ObserverId)> {
        let mut idle = Vec::new();
        for topic in self.inner.topics.iter() {
            for (id, observer) in &topic.observers {
                if now.saturating_duration_since(observer.activity.last_activity()) >= window {
                    idle.push((*topic.key(), *id));
                }
            }
        }

        for (mission_id, observer_id) in &idle {
            if self.unsubscribe(*mission_id, *observer_id) {
                self.inner.evicted_observers.fetch_add(1, Ordering::Relaxed);
            }
        }
        idle
    }

    pub fn evict_idle(&self, window: Duration) -> Vec<(MissionId, ObserverId)> {
        self.evict_idle_at(Instant::now(), window)
    }

    /// Close every subscription. Used at shutdown so observer sockets end.
    pub fn close_all(&self) {
        let all: Vec<(MissionId, ObserverId)> = self
            .inner
            .topics
            .iter()
            .flat_map(|topic| {
                let mission_id = *topic.key();
                topic.observers.keys().map(move |id| (mission_id, *id)).collect::<Vec<_>>()
            })
            .collect();
        for (mission_id, observer_id) in all {
            self.unsubscribe(mission_id, observer_id);
        }
    }

    pub fn stats(&self) -> ChannelStats {
        let mut missions: Vec<MissionObservers> = self
            .inner
            .topics
            .iter()
            .map(|topic| MissionObservers {
                mission_id: *topic.key(),
                observers: topic.observers.len(),
                buffered: topic.sender.len(),
                dropped: topic.observers.values().map(|o| o.activity.dropped()).sum(),
            })
            .collect();
        missions.sort_by_key(|m| m.mission_id);

        ChannelStats {
            total_observers: missions.iter().map(|m| m.observers).sum(),
            published: self.inner.published.load(Ordering::Relaxed),
            dropped_messages: self.inner.dropped_messages.load(Ordering::Relaxed),
            evicted_observers: self.inner.evicted_observers.load(Ordering::Relaxed),
            dropped_analysis_jobs: self.inner.dropped_analysis_jobs.load(Ordering::Relaxed),
            missions,
        }
    }
}
