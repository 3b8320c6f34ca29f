//! Mission lifecycle integration tests.
//!
//! Runs the simulator at 50x speed (2 ms ticks, 0.1 s of simulated flight
//! per tick) against a temporary SQLite database.
//!
//! Run with: cargo test --test mission_flow_test

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::sleep;

use agcs_core::error::MissionError;
use agcs_core::models::{CreateMissionRequest, Mission, MissionStatus, Waypoint};
use agcs_core::path::total_distance;
use agcs_core::protocol::StreamMessage;
use agcs_core::simulation::{JitterSettings, SimSnapshot};
use agcs_server::mission::ProgressOutcome;
use agcs_server::persistence::{logs as logs_db, missions as missions_db};
use agcs_server::{config::Config, loops, persistence, state::AppState};

struct Harness {
    state: Arc<AppState>,
    shutdown: broadcast::Sender<()>,
    database_path: String,
}

fn test_config(database_path: &str) -> Config {
    let mut config = Config::from_env();
    config.database_path = database_path.to_string();
    config.tick = Duration::from_millis(2);
    config.time_scale = 50.0;
    config.simulation.jitter = JitterSettings::none();
    config.simulation.seed = Some(11);
    config.observer_queue_capacity = 100_000;
    config
}

async fn harness_at(database_path: String) -> Harness {
    let config = test_config(&database_path);
    let db = persistence::init_database(&config.database_path, config.database_max_connections)
        .await
        .expect("init db");
    let (state, queues) = AppState::build(config, db);
    let (shutdown, _) = broadcast::channel(1);
    loops::spawn_all(&state, queues, &shutdown);
    Harness {
        state,
        shutdown,
        database_path,
    }
}

async fn harness() -> Harness {
    let path = std::env::temp_dir()
        .join(format!("agcs-flow-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    harness_at(path).await
}

fn waypoints(lons: &[f64]) -> Vec<Waypoint> {
    lons.iter()
        .enumerate()
        .map(|(i, lon)| Waypoint {
            sequence: i as u32,
            latitude: 0.0,
            longitude: *lon,
            altitude_m: 30.0,
            action: None,
            duration_s: 0.0,
        })
        .collect()
}

async fn create(state: &AppState, lons: &[f64], speed_ms: f64) -> Mission {
    state
        .machine()
        .create(CreateMissionRequest {
            name: "Test field".to_string(),
            altitude_m: 30.0,
            speed_ms,
            waypoints: waypoints(lons),
        })
        .await
        .expect("create mission")
}

async fn wait_for_status(state: &AppState, id: i64, status: MissionStatus) -> Mission {
    for _ in 0..1500 {
        let mission = state.machine().get(id).await.expect("mission");
        if mission.status == status {
            return mission;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("mission {} never reached {}", id, status);
}

async fn completion_logs(state: &AppState, id: i64) -> usize {
    logs_db::list_logs(state.db().pool(), id, None, 10_000)
        .await
        .expect("logs")
        .iter()
        .filter(|entry| entry.message == "Mission completed")
        .count()
}

#[tokio::test]
async fn mission_flies_to_completion() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0, 0.001, 0.002], 5.0).await;
    let planned = total_distance(&mission.waypoints);

    let started = h.state.machine().start(mission.id).await.expect("start");
    assert_eq!(started.status, MissionStatus::Running);
    assert!(started.started_at.is_some());

    let done = wait_for_status(&h.state, mission.id, MissionStatus::Completed).await;
    assert_eq!(done.current_waypoint_index, 2);
    assert_eq!(done.progress, 100.0);
    assert!((done.distance_traveled_m - planned).abs() < 1e-6);
    assert!(done.completed_at.is_some());
    assert!(!h.state.machine().has_worker(mission.id));

    let history = h
        .state
        .channel()
        .history(mission.id, 0, 100_000)
        .await
        .expect("history");
    let flight_s = planned / 5.0;
    assert!(history.len() as f64 >= (flight_s / 0.1).floor());
    assert!(history.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));

    let last = history.last().expect("samples");
    assert!((last.lon - 0.002).abs() < 1e-9);
    assert!(last.battery_percent < 100.0 && last.battery_percent >= 10.0);

    let stored = persistence::missions::load_mission(h.state.db().pool(), mission.id)
        .await
        .expect("load")
        .expect("stored mission");
    assert_eq!(stored.status, MissionStatus::Completed);
    assert_eq!(stored.progress, 100.0);
}

#[tokio::test]
async fn completion_is_idempotent() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0, 0.0005], 5.0).await;
    h.state.machine().start(mission.id).await.expect("start");
    let done = wait_for_status(&h.state, mission.id, MissionStatus::Completed).await;

    for _ in 0..2 {
        let outcome = h
            .state
            .machine()
            .report_progress(mission.id, 100.0, 1, done.distance_traveled_m, None)
            .await
            .expect("report");
        assert_eq!(outcome, ProgressOutcome::Ignored);
    }

    let after = h.state.machine().get(mission.id).await.expect("mission");
    assert_eq!(after.completed_at, done.completed_at);
    assert_eq!(after.status, MissionStatus::Completed);
    assert_eq!(completion_logs(&h.state, mission.id).await, 1);
}

#[tokio::test]
async fn start_is_rejected_while_running() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0, 0.01], 1.0).await;
    let machine = h.state.machine();

    machine.start(mission.id).await.expect("start");
    assert!(matches!(
        machine.start(mission.id).await,
        Err(MissionError::AlreadyRunning(id)) if id == mission.id
    ));
    assert_eq!(machine.worker_count(), 1);

    let aborted = machine.abort(mission.id).await.expect("abort");
    assert_eq!(aborted.status, MissionStatus::Aborted);
    assert!(aborted.completed_at.is_none());
    assert!(!machine.has_worker(mission.id));

    assert!(matches!(
        machine.start(mission.id).await,
        Err(MissionError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn single_waypoint_is_rejected() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0], 5.0).await;

    assert_eq!(
        h.state.machine().start(mission.id).await.unwrap_err(),
        MissionError::InsufficientWaypoints { count: 1 }
    );
    let unchanged = h.state.machine().get(mission.id).await.expect("mission");
    assert_eq!(unchanged.status, MissionStatus::Planned);
    assert!(!h.state.machine().has_worker(mission.id));
}

#[tokio::test]
async fn pause_and_resume_continue_the_same_flight() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0, 0.001, 0.002], 2.0).await;
    let planned = total_distance(&mission.waypoints);
    let machine = h.state.machine();

    machine.start(mission.id).await.expect("start");
    sleep(Duration::from_millis(50)).await;

    let paused = machine.pause(mission.id).await.expect("pause");
    assert_eq!(paused.status, MissionStatus::Paused);
    let snapshot = paused.sim_snapshot.expect("snapshot");
    assert!(paused.progress > 0.0 && paused.progress < 100.0);

    sleep(Duration::from_millis(100)).await;
    let still = machine.get(mission.id).await.expect("mission");
    assert_eq!(still.distance_traveled_m, paused.distance_traveled_m);
    assert_eq!(still.sim_snapshot, Some(snapshot));

    assert!(matches!(
        machine.pause(mission.id).await,
        Err(MissionError::InvalidTransition { .. })
    ));

    let resumed = machine.resume(mission.id).await.expect("resume");
    assert_eq!(resumed.status, MissionStatus::Running);

    let done = wait_for_status(&h.state, mission.id, MissionStatus::Completed).await;
    assert!((done.distance_traveled_m - planned).abs() < 1e-6);
    assert_eq!(done.progress, 100.0);

    let history = h
        .state
        .channel()
        .history(mission.id, 0, 100_000)
        .await
        .expect("history");
    // No jump backwards across the pause.
    assert!(history.windows(2).all(|pair| pair[1].lon >= pair[0].lon));
    assert!((history.last().expect("samples").lon - 0.002).abs() < 1e-9);
}

#[tokio::test]
async fn observers_see_lifecycle_updates() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0, 0.0005], 5.0).await;
    let mut subscription = h.state.channel().subscribe(mission.id);

    h.state.machine().start(mission.id).await.expect("start");
    wait_for_status(&h.state, mission.id, MissionStatus::Completed).await;

    let mut updates = Vec::new();
    let mut telemetry = 0;
    while let Some(msg) = subscription.try_recv() {
        match msg.as_ref() {
            StreamMessage::MissionUpdate { data, .. } => updates.push(data.status),
            StreamMessage::Telemetry { .. } => telemetry += 1,
            _ => {}
        }
    }
    assert!(telemetry > 0);
    assert_eq!(updates.first(), Some(&MissionStatus::Running));
    assert_eq!(updates.last(), Some(&MissionStatus::Completed));
}

#[tokio::test]
async fn interrupted_mission_is_paused_after_restart() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0, 0.01], 1.0).await;
    h.state.machine().start(mission.id).await.expect("start");
    sleep(Duration::from_millis(50)).await;

    h.state.machine().shutdown().await;
    let _ = h.shutdown.send(());
    assert_eq!(h.state.machine().worker_count(), 0);

    let restarted = harness_at(h.database_path.clone()).await;
    let machine = restarted.state.machine();
    assert_eq!(machine.recover_interrupted().await.expect("recover"), 1);

    let recovered = machine.get(mission.id).await.expect("mission");
    assert_eq!(recovered.status, MissionStatus::Paused);
    let snapshot = recovered.sim_snapshot.expect("snapshot survives restart");
    assert!(snapshot.segment_fraction > 0.0);

    let resumed = machine.resume(mission.id).await.expect("resume");
    assert_eq!(resumed.status, MissionStatus::Running);
    assert!(machine.has_worker(mission.id));
    machine.abort(mission.id).await.expect("abort");
}

#[tokio::test]
async fn rejected_resume_leaves_mission_paused() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0, 0.01], 1.0).await;

    // A stored snapshot that sits on the last waypoint without being finished
    // cannot be restored.
    let bad_snapshot = SimSnapshot {
        current_waypoint_index: 1,
        segment_fraction: 0.0,
        completed_distance_m: 0.0,
        elapsed_s: 0.0,
        finished: false,
    };
    sqlx::query("UPDATE missions SET status = 'paused', sim_snapshot = ?1 WHERE id = ?2")
        .bind(serde_json::to_string(&bad_snapshot).expect("encode snapshot"))
        .bind(mission.id)
        .execute(h.state.db().pool())
        .await
        .expect("store snapshot");

    let restarted = harness_at(h.database_path.clone()).await;
    let machine = restarted.state.machine();
    let err = machine.resume(mission.id).await.expect_err("bad snapshot");
    assert!(matches!(err, MissionError::InvalidMission(_)));

    let current = machine.get(mission.id).await.expect("mission");
    assert_eq!(current.status, MissionStatus::Paused);
    assert!(!machine.has_worker(mission.id));
    let stored = missions_db::load_mission(restarted.state.db().pool(), mission.id)
        .await
        .expect("load")
        .expect("stored mission");
    assert_eq!(stored.status, MissionStatus::Paused);

    // The mission can still be aborted normally.
    let aborted = machine.abort(mission.id).await.expect("abort");
    assert_eq!(aborted.status, MissionStatus::Aborted);
}

#[tokio::test]
async fn completion_is_retried_until_it_is_stored() {
    let h = harness().await;
    let mission = create(&h.state, &[0.0, 0.0005], 5.0).await;
    let pool = h.state.db().pool();

    sqlx::query(
        "CREATE TRIGGER reject_completion BEFORE UPDATE OF status ON missions \
         WHEN NEW.status = 'completed' BEGIN SELECT RAISE(ABORT, 'completion rejected'); END",
    )
    .execute(pool)
    .await
    .expect("create trigger");

    h.state.machine().start(mission.id).await.expect("start");
    for _ in 0..500 {
        if h.state.machine().get(mission.id).await.expect("mission").progress >= 100.0 {
            break;
        }
        sleep(Duration::from_millis(10)).await;
    }
    sleep(Duration::from_millis(100)).await;

    // The route is flown but the completion write keeps failing.
    let stuck = h.state.machine().get(mission.id).await.expect("mission");
    assert_eq!(stuck.progress, 100.0);
    assert_eq!(stuck.status, MissionStatus::Running);
    assert!(stuck.completed_at.is_none());
    assert!(h.state.machine().has_worker(mission.id));
    assert_eq!(completion_logs(&h.state, mission.id).await, 0);

    sqlx::query("DROP TRIGGER reject_completion")
        .execute(pool)
        .await
        .expect("drop trigger");

    let done = wait_for_status(&h.state, mission.id, MissionStatus::Completed).await;
    assert!(done.completed_at.is_some());
    let stored = missions_db::load_mission(pool, mission.id)
        .await
        .expect("load")
        .expect("stored mission");
    assert_eq!(stored.status, MissionStatus::Completed);
    assert_eq!(completion_logs(&h.state, mission.id).await, 1);
}
