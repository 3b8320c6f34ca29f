//! Mission state machine and simulation worker registry.
//!
//! Commands for one mission are serialized by a per-mission async lock. The
//! mission record itself sits behind a short synchronous lock that is never
//! held across an `.await`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

use agcs_core::error::MissionError;
use agcs_core::lifecycle::{can_complete, check_transition, MissionCommand};
use agcs_core::models::{
    CreateMissionRequest, LogLevel, Mission, MissionId, MissionLogEntry, MissionStatus,
};
use agcs_core::protocol::{ProgressReport, StreamMessage};
use agcs_core::simulation::{FlightSimulator, SimSnapshot, SimulationParams};

use super::worker::{run_mission_worker, WorkerControl};
use crate::config::Config;
use crate::persistence::{logs as logs_db, missions as missions_db};
use crate::persistence::{Database, PersistQueue, ProgressUpdate};
use crate::telemetry::TelemetryChannel;

const CONTROL_QUEUE: usize = 8;

/// Simulation timing shared by every worker.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    pub tick: Duration,
    /// Simulated seconds per tick.
    pub dt_s: f64,
    pub params: SimulationParams,
}

impl WorkerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            tick: config.tick,
            dt_s: config.sim_dt_s(),
            params: config.simulation,
        }
    }
}

/// Result of a progress signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressOutcome {
    Recorded,
    /// This signal completed the mission.
    Completed,
    /// The mission is already terminal; nothing changed.
    Ignored,
}

struct MissionSlot {
    record: Mutex<Mission>,
    commands: tokio::sync::Mutex<()>,
    completion: tokio::sync::Mutex<()>,
}

impl MissionSlot {
    fn new(mission: Mission) -> Self {
        Self {
            record: Mutex::new(mission),
            commands: tokio::sync::Mutex::new(()),
            completion: tokio::sync::Mutex::new(()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Mission> {
        self.record.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current(&self) -> Mission {
        self.lock().clone()
    }

    fn replace(&self, mission: Mission) {
        *self.lock() = mission;
    }
}

struct WorkerHandle {
    run_id: Uuid,
    control: mpsc::Sender<WorkerControl>,
    join: JoinHandle<()>,
}

fn storage(err: anyhow::Error) -> MissionError {
    MissionError::Storage(err.to_string())
}

fn ready_to_complete(mission: &Mission) -> bool {
    can_complete(mission.status)
        && mission.current_waypoint_index >= mission.last_waypoint_index()
        && mission.progress >= 100.0
}

pub struct MissionStateMachine {
    db: Database,
    channel: TelemetryChannel,
    persist: PersistQueue,
    settings: WorkerSettings,
    missions: DashMap<MissionId, Arc<MissionSlot>>,
    workers: DashMap<MissionId, WorkerHandle>,
}

impl MissionStateMachine {
    pub fn new(
        db: Database,
        channel: TelemetryChannel,
        persist: PersistQueue,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            db,
            channel,
            persist,
            settings,
            missions: DashMap::new(),
            workers: DashMap::new(),
        }
    }

    pub fn channel(&self) -> &TelemetryChannel {
        &self.channel
    }

    pub fn settings(&self) -> &WorkerSettings {
        &self.settings
    }

    async fn slot(&self, id: MissionId) -> Result<Arc<MissionSlot>, MissionError> {
        if let Some(slot) = self.missions.get(&id) {
            return Ok(slot.clone());
        }
        let mission = missions_db::load_mission(self.db.pool(), id)
            .await
            .map_err(storage)?
            .ok_or(MissionError::NotFound(id))?;
        let slot = self
            .missions
            .entry(id)
            .or_insert_with(|| Arc::new(MissionSlot::new(mission)))
            .clone();
        Ok(slot)
    }

    pub async fn create(&self, request: CreateMissionRequest) -> Result<Mission, MissionError> {
        let waypoints = request.validated_waypoints()?;
        let name = request.name.trim();
        if name.is_empty() {
            return Err(MissionError::InvalidMission("name must not be empty".into()));
        }

        let mission = missions_db::insert_mission(
            self.db.pool(),
            name,
            request.altitude_m,
            request.speed_ms,
            &waypoints,
        )
        .await
        .map_err(storage)?;

        self.missions
            .insert(mission.id, Arc::new(MissionSlot::new(mission.clone())));
        tracing::info!(mission_id = mission.id, waypoints = waypoints.len(), "Mission created");
        self.append_log(
            MissionLogEntry::info(mission.id, format!("Mission '{}' created", mission.name))
                .with_data(serde_json::json!({ "waypoints": mission.waypoints.len() })),
        )
        .await;
        Ok(mission)
    }

    pub async fn get(&self, id: MissionId) -> Result<Mission, MissionError> {
        Ok(self.slot(id).await?.current())
    }

    /// Every mission, newest first. Cached records win over stored rows.
    pub async fn list(&self) -> Result<Vec<Mission>, MissionError> {
        let stored = missions_db::load_missions(self.db.pool())
            .await
            .map_err(storage)?;
        Ok(stored
            .into_iter()
            .map(|mission| match self.missions.get(&mission.id) {
                Some(slot) => slot.current(),
                None => mission,
            })
            .collect())
    }

    pub async fn start(self: &Arc<Self>, id: MissionId) -> Result<Mission, MissionError> {
        let slot = self.slot(id).await?;
        let _guard = slot.commands.lock().await;

        let mut mission = slot.current();
        if self.workers.contains_key(&id) || mission.status == MissionStatus::Running {
            return Err(MissionError::AlreadyRunning(id));
        }
        check_transition(mission.status, MissionCommand::Start)?;
        let sim = FlightSimulator::new(&mission, self.settings.params)?;

        mission.status = MissionStatus::Running;
        if mission.started_at.is_none() {
            mission.started_at = Some(Utc::now().trunc_subsecs(6));
        }
        missions_db::update_mission_state(self.db.pool(), &mission)
            .await
            .map_err(storage)?;
        slot.replace(mission.clone());
        self.spawn_worker(id, sim);

        tracing::info!(mission_id = id, "Mission started");
        self.announce(&mission, "Mission started", None).await;
        Ok(mission)
    }

    pub async fn pause(self: &Arc<Self>, id: MissionId) -> Result<Mission, MissionError> {
        let slot = self.slot(id).await?;
        let _guard = slot.commands.lock().await;

        check_transition(slot.current().status, MissionCommand::Pause)?;
        let snapshot = self.request_pause(id).await;

        // The worker may have completed the mission while we waited.
        let mut mission = slot.current();
        check_transition(mission.status, MissionCommand::Pause)?;
        mission.status = MissionStatus::Paused;
        if snapshot.is_some() {
            mission.sim_snapshot = snapshot;
        }

        if let Err(err) = missions_db::update_mission_state(self.db.pool(), &mission).await {
            self.request_resume(id).await;
            return Err(storage(err));
        }
        slot.replace(mission.clone());

        tracing::info!(mission_id = id, progress = mission.progress, "Mission paused");
        self.announce(&mission, "Mission paused", None).await;
        Ok(mission)
    }

    pub async fn resume(self: &Arc<Self>, id: MissionId) -> Result<Mission, MissionError> {
        let slot = self.slot(id).await?;
        let _guard = slot.commands.lock().await;

        let mut mission = slot.current();
        check_transition(mission.status, MissionCommand::Resume)?;
        // A paused worker keeps its simulator; otherwise rebuild it before
        // anything is written so a bad snapshot leaves the mission paused.
        let mut restored = match self.control(id) {
            Some(_) => None,
            None => Some(self.restore_simulator(&mission)?),
        };

        mission.status = MissionStatus::Running;
        missions_db::update_mission_state(self.db.pool(), &mission)
            .await
            .map_err(storage)?;
        slot.replace(mission.clone());

        if !self.request_resume(id).await {
            let sim = match restored.take() {
                Some(sim) => sim,
                None => match self.restore_simulator(&mission) {
                    Ok(sim) => sim,
                    Err(err) => {
                        self.revert_status(&slot, MissionStatus::Paused).await;
                        return Err(err);
                    }
                },
            };
            self.spawn_worker(id, sim);
        }

        tracing::info!(mission_id = id, progress = mission.progress, "Mission resumed");
        self.announce(&mission, "Mission resumed", None).await;
        Ok(mission)
    }

    pub async fn abort(&self, id: MissionId) -> Result<Mission, MissionError> {
        let slot = self.slot(id).await?;
        let _guard = slot.commands.lock().await;

        check_transition(slot.current().status, MissionCommand::Abort)?;
        let snapshot = self.stop_worker(id).await;

        let mut mission = slot.current();
        check_transition(mission.status, MissionCommand::Abort)?;
        mission.status = MissionStatus::Aborted;
        if snapshot.is_some() {
            mission.sim_snapshot = snapshot;
        }
        missions_db::update_mission_state(self.db.pool(), &mission)
            .await
            .map_err(storage)?;
        slot.replace(mission.clone());

        tracing::info!(mission_id = id, progress = mission.progress, "Mission aborted");
        self.announce(&mission, "Mission aborted", None).await;
        Ok(mission)
    }

    /// Record a progress signal. This is the only path to `completed`.
    pub async fn report_progress(
        &self,
        id: MissionId,
        progress: f64,
        waypoint_index: usize,
        distance_traveled_m: f64,
        snapshot: Option<SimSnapshot>,
    ) -> Result<ProgressOutcome, MissionError> {
        let slot = self.slot(id).await?;

        let (mission, ready) = {
            let mut record = slot.lock();
            if record.status.is_terminal() {
                return Ok(ProgressOutcome::Ignored);
            }
            record.record_progress(progress, waypoint_index, distance_traveled_m);
            if snapshot.is_some() {
                record.sim_snapshot = snapshot;
            }
            (record.clone(), ready_to_complete(&record))
        };

        if !ready {
            self.persist.enqueue_progress(ProgressUpdate::from(&mission));
            return Ok(ProgressOutcome::Recorded);
        }
        self.complete(id, &slot).await
    }

    /// Progress reported by a real drone link. The mission must be running.
    pub async fn report_external_progress(
        &self,
        id: MissionId,
        report: ProgressReport,
    ) -> Result<ProgressOutcome, MissionError> {
        if !(report.progress.is_finite() && report.distance_traveled_m.is_finite()) {
            return Err(MissionError::InvalidMission("progress values must be finite".into()));
        }
        let before = self.get(id).await?;
        if before.status.is_terminal() {
            return Ok(ProgressOutcome::Ignored);
        }
        if before.status != MissionStatus::Running {
            return Err(MissionError::InvalidTransition {
                from: before.status,
                command: "report progress for",
            });
        }
        if report.waypoint_index > before.last_waypoint_index() {
            return Err(MissionError::InvalidMission(format!(
                "waypoint index {} is out of range for {} waypoints",
                report.waypoint_index,
                before.waypoints.len()
            )));
        }

        tracing::debug!(mission_id = id, progress = report.progress, "External progress received");
        let outcome = self
            .report_progress(
                id,
                report.progress,
                report.waypoint_index,
                report.distance_traveled_m,
                None,
            )
            .await?;
        if report.waypoint_index > before.current_waypoint_index {
            self.record_waypoint(id, report.waypoint_index);
        }
        Ok(outcome)
    }

    /// Persist completion, then publish it. On a failed write the in-memory
    /// record stays `running` so the caller can retry.
    async fn complete(&self, id: MissionId, slot: &MissionSlot) -> Result<ProgressOutcome, MissionError> {
        let _guard = slot.completion.lock().await;

        let mut mission = slot.current();
        if mission.status.is_terminal() {
            return Ok(ProgressOutcome::Ignored);
        }
        if !ready_to_complete(&mission) {
            // Paused while waiting for the completion lock.
            self.persist.enqueue_progress(ProgressUpdate::from(&mission));
            return Ok(ProgressOutcome::Recorded);
        }
        mission.status = MissionStatus::Completed;
        mission.completed_at = Some(Utc::now().trunc_subsecs(6));

        if let Err(err) = missions_db::update_mission_state(self.db.pool(), &mission).await {
            tracing::error!(mission_id = id, "Failed to persist mission completion: {}", err);
            return Err(storage(err));
        }
        let mission = {
            let mut record = slot.lock();
            record.status = MissionStatus::Completed;
            record.completed_at = mission.completed_at;
            record.clone()
        };

        tracing::info!(
            mission_id = id,
            distance_m = mission.distance_traveled_m,
            "Mission completed"
        );
        self.announce(
            &mission,
            "Mission completed",
            Some(serde_json::json!({ "distance_traveled_m": mission.distance_traveled_m })),
        )
        .await;
        Ok(ProgressOutcome::Completed)
    }

    /// Log and broadcast a waypoint arrival without blocking the caller.
    pub fn record_waypoint(&self, id: MissionId, waypoint_index: usize) {
        let Some(mission) = self.missions.get(&id).map(|slot| slot.current()) else {
            return;
        };
        let sequence = mission.waypoints.get(waypoint_index).map(|wp| wp.sequence);
        tracing::debug!(mission_id = id, waypoint_index, "Waypoint reached");

        let entry = MissionLogEntry::info(id, format!("Reached waypoint {}", waypoint_index))
            .with_data(serde_json::json!({
                "waypoint_index": waypoint_index,
                "sequence": sequence,
            }));
        let db = self.db.clone();
        tokio::spawn(async move {
            if let Err(err) = logs_db::insert_log(db.pool(), &entry).await {
                tracing::warn!(mission_id = entry.mission_id, "Failed to write waypoint log: {}", err);
            }
        });

        self.channel.broadcast(StreamMessage::mission_update(
            &mission,
            Some(format!("Reached waypoint {}", waypoint_index)),
        ));
    }

    /// Move missions left running by a previous process to paused.
    pub async fn recover_interrupted(&self) -> anyhow::Result<usize> {
        let ids = missions_db::load_mission_ids_by_status(self.db.pool(), MissionStatus::Running).await?;
        for id in &ids {
            let slot = self.slot(*id).await?;
            let mut mission = slot.current();
            mission.status = MissionStatus::Paused;
            missions_db::update_mission_state(self.db.pool(), &mission).await?;
            slot.replace(mission);

            tracing::warn!(mission_id = *id, "Mission was running at shutdown; paused");
            self.append_log(MissionLogEntry {
                mission_id: *id,
                timestamp: Utc::now(),
                level: LogLevel::Warning,
                message: "Mission interrupted by server restart; paused".to_string(),
                data: None,
            })
            .await;
        }
        Ok(ids.len())
    }

    /// Stop every worker and persist its simulator snapshot. Missions stay
    /// `running` in storage and are paused by recovery on the next boot.
    pub async fn shutdown(&self) {
        let ids: Vec<MissionId> = self.workers.iter().map(|entry| *entry.key()).collect();
        let stops = ids.into_iter().map(|id| async move { (id, self.stop_worker(id).await) });
        let stopped: HashMap<MissionId, Option<SimSnapshot>> =
            futures::future::join_all(stops).await.into_iter().collect();

        for (id, snapshot) in stopped {
            let Some(slot) = self.missions.get(&id).map(|slot| slot.clone()) else {
                continue;
            };
            let mission = {
                let mut record = slot.lock();
                if snapshot.is_some() {
                    record.sim_snapshot = snapshot;
                }
                record.clone()
            };
            if let Err(err) = missions_db::update_mission_state(self.db.pool(), &mission).await {
                tracing::warn!(mission_id = id, "Failed to persist snapshot at shutdown: {}", err);
            }
        }
        tracing::info!("Mission workers stopped");
    }

    /// Commanded speed for a mission that is currently running.
    pub fn commanded_speed(&self, id: MissionId) -> Option<f64> {
        let slot = self.missions.get(&id)?;
        let record = slot.lock();
        (record.status == MissionStatus::Running).then_some(record.speed_ms)
    }

    pub fn has_worker(&self, id: MissionId) -> bool {
        self.workers.contains_key(&id)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub(crate) fn deregister_worker(&self, id: MissionId, run_id: Uuid) {
        self.workers.remove_if(&id, |_, handle| handle.run_id == run_id);
    }

    fn spawn_worker(self: &Arc<Self>, id: MissionId, sim: FlightSimulator) {
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE);
        let (gate_tx, gate_rx) = oneshot::channel();
        let run_id = Uuid::new_v4();

        let join = tokio::spawn(run_mission_worker(
            self.clone(),
            sim,
            run_id,
            control_rx,
            gate_rx,
        ));
        self.workers.insert(
            id,
            WorkerHandle {
                run_id,
                control: control_tx,
                join,
            },
        );
        let _ = gate_tx.send(());
        tracing::debug!(mission_id = id, %run_id, "Simulation worker spawned");
    }

    fn restore_simulator(&self, mission: &Mission) -> Result<FlightSimulator, MissionError> {
        let params = self.settings.params;
        match mission.sim_snapshot {
            Some(snapshot) => FlightSimulator::from_snapshot(mission, params, snapshot),
            None => {
                tracing::warn!(
                    mission_id = mission.id,
                    "No simulation snapshot stored; restarting route from the first waypoint"
                );
                FlightSimulator::new(mission, params)
            }
        }
    }

    /// Undo an in-memory and stored status change after a failed command.
    async fn revert_status(&self, slot: &MissionSlot, status: MissionStatus) {
        let mission = {
            let mut record = slot.lock();
            record.status = status;
            record.clone()
        };
        if let Err(err) = missions_db::update_mission_state(self.db.pool(), &mission).await {
            tracing::error!(mission_id = mission.id, "Failed to revert mission status: {}", err);
        }
    }

    fn control(&self, id: MissionId) -> Option<mpsc::Sender<WorkerControl>> {
        self.workers.get(&id).map(|handle| handle.control.clone())
    }

    async fn request_pause(&self, id: MissionId) -> Option<SimSnapshot> {
        let control = self.control(id)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        control.send(WorkerControl::Pause(ack_tx)).await.ok()?;
        ack_rx.await.ok()
    }

    /// Returns false when no live worker took the request.
    async fn request_resume(&self, id: MissionId) -> bool {
        let Some(control) = self.control(id) else {
            return false;
        };
        let (ack_tx, ack_rx) = oneshot::channel();
        if control.send(WorkerControl::Resume(ack_tx)).await.is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }

    async fn stop_worker(&self, id: MissionId) -> Option<SimSnapshot> {
        let (_, handle) = self.workers.remove(&id)?;
        let (ack_tx, ack_rx) = oneshot::channel();
        let snapshot = match handle.control.send(WorkerControl::Stop(ack_tx)).await {
            Ok(()) => ack_rx.await.ok(),
            Err(_) => None,
        };
        if let Err(err) = handle.join.await {
            tracing::warn!(mission_id = id, "Simulation worker ended abnormally: {}", err);
        }
        snapshot
    }

    async fn announce(&self, mission: &Mission, message: &str, data: Option<serde_json::Value>) {
        let mut entry = MissionLogEntry::info(mission.id, message);
        entry.data = data;
        self.append_log(entry).await;
        self.channel
            .broadcast(StreamMessage::mission_update(mission, Some(message.to_string())));
    }

    async fn append_log(&self, entry: MissionLogEntry) {
        if let Err(err) = logs_db::insert_log(self.db.pool(), &entry).await {
            tracing::warn!(mission_id = entry.mission_id, "Failed to write mission log: {}", err);
        }
    }
}
