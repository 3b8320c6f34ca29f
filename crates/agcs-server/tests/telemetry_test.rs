//! Telemetry channel integration tests.
//!
//! Run with: cargo test --test telemetry_test

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use tokio::sync::broadcast;

use tokio::net::TcpListener;
use tokio_tungstenite::connect_async;

use agcs_core::models::{CreateMissionRequest, InsightKind, TelemetrySample, Waypoint};
use agcs_core::protocol::StreamMessage;
use agcs_server::persistence::insights as insights_db;
use agcs_server::{api, config::Config, loops, persistence, state::AppState};

struct Harness {
    state: Arc<AppState>,
    _shutdown: broadcast::Sender<()>,
}

fn test_config(observer_capacity: usize) -> Config {
    let mut config = Config::from_env();
    config.database_path = std::env::temp_dir()
        .join(format!("agcs-telemetry-{}.db", uuid::Uuid::new_v4()))
        .to_string_lossy()
        .to_string();
    config.observer_queue_capacity = observer_capacity;
    config
}

async fn harness_with(config: Config) -> Harness {
    let db = persistence::init_database(&config.database_path, config.database_max_connections)
        .await
        .expect("init db");
    let (state, queues) = AppState::build(config, db);
    let (shutdown_tx, _) = broadcast::channel(1);
    loops::spawn_all(&state, queues, &shutdown_tx);
    Harness {
        state,
        _shutdown: shutdown_tx,
    }
}

async fn harness(observer_capacity: usize) -> Harness {
    harness_with(test_config(observer_capacity)).await
}

async fn mission(state: &AppState) -> i64 {
    let waypoints = (0..2)
        .map(|i| Waypoint {
            sequence: i,
            latitude: 0.0,
            longitude: 0.001 * f64::from(i),
            altitude_m: 30.0,
            action: None,
            duration_s: 0.0,
        })
        .collect();
    state
        .machine()
        .create(CreateMissionRequest {
            name: "Orchard".to_string(),
            altitude_m: 30.0,
            speed_ms: 5.0,
            waypoints,
        })
        .await
        .expect("create mission")
        .id
}

fn sample(mission_id: i64, n: i64) -> TelemetrySample {
    let base = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
    TelemetrySample {
        mission_id,
        timestamp: base + ChronoDuration::milliseconds(100 * n),
        lat: 0.0,
        lon: 0.00001 * n as f64,
        altitude_m: 30.0,
        speed_ms: 5.0,
        battery_percent: 99.0,
        heading_deg: 90.0,
        roll_deg: 0.0,
        pitch_deg: -2.5,
        yaw_deg: 90.0,
        gps_fix_type: 3,
        satellites_visible: 12,
        ground_speed_ms: None,
        vertical_speed_ms: None,
    }
}

fn telemetry_index(msg: &StreamMessage) -> i64 {
    match msg {
        StreamMessage::Telemetry { data, .. } => (data.lon / 0.00001).round() as i64,
        other => panic!("unexpected {} message", other.kind()),
    }
}

#[tokio::test]
async fn every_observer_receives_samples_in_order() {
    let h = harness(256).await;
    let id = mission(&h.state).await;
    let channel = h.state.channel();

    let mut observers: Vec<_> = (0..3).map(|_| channel.subscribe(id)).collect();
    for n in 0..50 {
        assert_eq!(channel.publish(sample(id, n)), 3);
    }

    for observer in &mut observers {
        let received: Vec<i64> = std::iter::from_fn(|| observer.try_recv())
            .map(|msg| telemetry_index(&msg))
            .collect();
        assert_eq!(received, (0..50).collect::<Vec<_>>());
        assert_eq!(observer.dropped(), 0);
    }
}

#[tokio::test]
async fn slow_observer_keeps_newest_suffix() {
    let h = harness(8).await;
    let id = mission(&h.state).await;
    let channel = h.state.channel();

    let mut slow = channel.subscribe(id);
    let mut fast = channel.subscribe(id);
    let mut fast_seen = Vec::new();
    for n in 0..20 {
        channel.publish(sample(id, n));
        while let Some(msg) = fast.try_recv() {
            fast_seen.push(telemetry_index(&msg));
        }
    }

    let kept: Vec<i64> = std::iter::from_fn(|| slow.try_recv())
        .map(|msg| telemetry_index(&msg))
        .collect();
    assert_eq!(kept, (12..20).collect::<Vec<_>>());
    assert_eq!(slow.dropped(), 12);
    assert_eq!(fast.dropped(), 0);
    assert_eq!(fast_seen, (0..20).collect::<Vec<_>>());
    assert_eq!(channel.stats().dropped_messages, 12);
}

#[tokio::test]
async fn unsubscribe_is_idempotent() {
    let h = harness(16).await;
    let id = mission(&h.state).await;
    let channel = h.state.channel();

    let mut subscription = channel.subscribe(id);
    assert_eq!(channel.observer_count(id), 1);
    assert!(subscription.unsubscribe());
    assert!(!subscription.unsubscribe());
    assert!(!channel.unsubscribe(id, subscription.id()));
    assert_eq!(channel.observer_count(id), 0);
    assert!(subscription.recv().await.is_none());

    // Publishing with no observers still succeeds.
    assert_eq!(channel.publish(sample(id, 0)), 0);
}

#[tokio::test]
async fn dropping_a_subscription_unsubscribes() {
    let h = harness(16).await;
    let id = mission(&h.state).await;
    let channel = h.state.channel();

    {
        let _a = channel.subscribe(id);
        let _b = channel.subscribe(id);
        assert_eq!(channel.observer_count(id), 2);
    }
    assert_eq!(channel.observer_count(id), 0);
    assert_eq!(channel.stats().total_observers, 0);
}

#[tokio::test]
async fn idle_observers_are_evicted() {
    let h = harness(16).await;
    let id = mission(&h.state).await;
    let channel = h.state.channel();
    let window = Duration::from_secs(30);

    let subscription = channel.subscribe(id);
    assert!(channel.evict_idle_at(Instant::now() + Duration::from_secs(10), window).is_empty());
    assert_eq!(channel.observer_count(id), 1);

    let evicted = channel.evict_idle_at(Instant::now() + Duration::from_secs(31), window);
    assert_eq!(evicted, vec![(id, subscription.id())]);
    assert!(subscription.is_closed());
    assert_eq!(channel.stats().evicted_observers, 1);
}

#[tokio::test]
async fn history_sees_everything_published_before_the_call() {
    let h = harness(16).await;
    let id = mission(&h.state).await;
    let channel = h.state.channel();

    for n in 0..10 {
        channel.publish(sample(id, n));
    }
    let history = channel.history(id, 0, 100).await.expect("history");
    assert_eq!(history.len(), 10);
    assert!(history.windows(2).all(|pair| pair[0].timestamp < pair[1].timestamp));
    assert_eq!(history[0], sample(id, 0));

    let page = channel.history(id, 5, 3).await.expect("history page");
    let timestamps: Vec<_> = page.iter().map(|s| s.timestamp).collect();
    assert_eq!(
        timestamps,
        (5..8).map(|n| sample(id, n).timestamp).collect::<Vec<_>>()
    );
}

#[tokio::test]
async fn envelopes_are_fanned_out_but_not_persisted() {
    let h = harness(16).await;
    let id = mission(&h.state).await;
    let channel = h.state.channel();
    let mut observer = channel.subscribe(id);

    let current = h.state.machine().get(id).await.expect("mission");
    assert_eq!(channel.broadcast(StreamMessage::mission_update(&current, None)), 1);

    let msg = observer.recv().await.expect("envelope");
    assert_eq!(msg.kind(), "mission_update");
    assert!(channel.history(id, 0, 100).await.expect("history").is_empty());
}

#[tokio::test]
async fn low_battery_sample_raises_alert_and_insight() {
    let h = harness(64).await;
    let id = mission(&h.state).await;
    let channel = h.state.channel();
    let mut observer = channel.subscribe(id);

    let mut low = sample(id, 0);
    low.battery_percent = 12.0;
    assert_eq!(channel.publish(low), 1);

    let alert = loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), observer.recv())
            .await
            .expect("alert within timeout")
            .expect("subscription open");
        if let StreamMessage::Alert { data, .. } = msg.as_ref() {
            break data.clone();
        }
    };
    assert_eq!(alert.kind, InsightKind::Anomaly);
    assert!(alert.is_alert);
    assert_eq!(alert.message, "Low battery");

    let stored = insights_db::list_insights(h.state.db().pool(), id, Some(InsightKind::Anomaly), 10)
        .await
        .expect("insights");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].message, "Low battery");
}

#[tokio::test]
async fn full_analysis_queue_never_blocks_fan_out() {
    let mut config = test_config(64);
    config.analysis_queue_capacity = 1;
    let db = persistence::init_database(&config.database_path, config.database_max_connections)
        .await
        .expect("init db");
    // Background loops are not started, so nothing drains the analysis queue.
    let (state, _queues) = AppState::build(config, db);
    let id = mission(&state).await;
    let channel = state.channel();

    let mut observers: Vec<_> = (0..3).map(|_| channel.subscribe(id)).collect();
    for n in 0..5 {
        assert_eq!(channel.publish(sample(id, n)), 3);
    }

    for observer in &mut observers {
        let received: Vec<i64> = std::iter::from_fn(|| observer.try_recv())
            .map(|msg| telemetry_index(&msg))
            .collect();
        assert_eq!(received, (0..5).collect::<Vec<_>>());
    }
    let stats = channel.stats();
    assert_eq!(stats.dropped_analysis_jobs, 4);
    assert_eq!(stats.published, 5);
}

#[tokio::test]
async fn unanswered_heartbeats_do_not_keep_observer_alive() {
    let mut config = test_config(64);
    config.heartbeat_interval = Duration::from_millis(20);
    let h = harness_with(config).await;
    let id = mission(&h.state).await;

    let app = api::routes().with_state(h.state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    // The client never reads, so the server's pings are never answered.
    let (_socket, _) = connect_async(format!("ws://{}/v1/missions/{}/stream", addr, id))
        .await
        .expect("connect");
    for _ in 0..100 {
        if h.state.channel().observer_count(id) == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.state.channel().observer_count(id), 1);

    // Several heartbeats go out during this window.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let evicted = h.state.channel().evict_idle(Duration::from_millis(150));
    assert_eq!(evicted.len(), 1);
    assert_eq!(evicted[0].0, id);
}
