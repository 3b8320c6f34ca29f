//! Mission and waypoint persistence.

use anyhow::{Context, Result};
use chrono::{SubsecRound, Utc};
use sqlx::{Sqlite, SqlitePool};
use std::collections::HashMap;

use agcs_core::models::{Mission, MissionId, MissionStatus, Waypoint};
use agcs_core::simulation::SimSnapshot;

use super::db::{decode_time, encode_time};

/// Progress-only update coalesced by the persistence writer.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub mission_id: MissionId,
    pub progress: f64,
    pub current_waypoint_index: usize,
    pub distance_traveled_m: f64,
    pub sim_snapshot: Option<SimSnapshot>,
}

impl From<&Mission> for ProgressUpdate {
    fn from(mission: &Mission) -> Self {
        Self {
            mission_id: mission.id,
            progress: mission.progress,
            current_waypoint_index: mission.current_waypoint_index,
            distance_traveled_m: mission.distance_traveled_m,
            sim_snapshot: mission.sim_snapshot,
        }
    }
}

/// Insert a new planned mission with its (already sorted) waypoints.
pub async fn insert_mission(
    pool: &SqlitePool,
    name: &str,
    altitude_m: f64,
    speed_ms: f64,
    waypoints: &[Waypoint],
) -> Result<Mission> {
    let created_at = Utc::now().trunc_subsecs(6);
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        INSERT INTO missions (name, status, altitude_m, speed_ms, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(name)
    .bind(MissionStatus::Planned.as_str())
    .bind(altitude_m)
    .bind(speed_ms)
    .bind(encode_time(&created_at))
    .execute(&mut *tx)
    .await?;
    let id = result.last_insert_rowid();

    for wp in waypoints {
        sqlx::query(
            r#"
            INSERT INTO waypoints (mission_id, sequence, latitude, longitude, altitude_m, action, duration_s)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(id)
        .bind(wp.sequence as i64)
        .bind(wp.latitude)
        .bind(wp.longitude)
        .bind(wp.altitude_m)
        .bind(&wp.action)
        .bind(wp.duration_s)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;

    Ok(Mission {
        id,
        name: name.to_string(),
        status: MissionStatus::Planned,
        altitude_m,
        speed_ms,
        waypoints: waypoints.to_vec(),
        current_waypoint_index: 0,
        progress: 0.0,
        distance_traveled_m: 0.0,
        created_at,
        started_at: None,
        completed_at: None,
        sim_snapshot: None,
    })
}

pub async fn load_mission(pool: &SqlitePool, id: MissionId) -> Result<Option<Mission>> {
    let row = sqlx::query_as::<_, MissionRow>(&format!("{} WHERE id = ?1", SELECT_MISSIONS))
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let waypoints = sqlx::query_as::<_, WaypointRow>(
        "SELECT mission_id, sequence, latitude, longitude, altitude_m, action, duration_s FROM waypoints WHERE mission_id = ?1 ORDER BY sequence ASC",
    )
    .bind(id)
    .fetch_all(pool)
    .await?;

    let mut mission: Mission = row.try_into()?;
    mission.waypoints = waypoints.into_iter().map(Waypoint::from).collect();
    Ok(Some(mission))
}

/// Load every mission, newest first.
pub async fn load_missions(pool: &SqlitePool) -> Result<Vec<Mission>> {
    let rows = sqlx::query_as::<_, MissionRow>(&format!("{} ORDER BY id DESC", SELECT_MISSIONS))
        .fetch_all(pool)
        .await?;

    let waypoint_rows = sqlx::query_as::<_, WaypointRow>(
        "SELECT mission_id, sequence, latitude, longitude, altitude_m, action, duration_s FROM waypoints ORDER BY mission_id, sequence ASC",
    )
    .fetch_all(pool)
    .await?;

    let mut by_mission: HashMap<MissionId, Vec<Waypoint>> = HashMap::new();
    for row in waypoint_rows {
        by_mission.entry(row.mission_id).or_default().push(row.into());
    }

    rows.into_iter()
        .map(|row| {
            let mut mission: Mission = row.try_into()?;
            mission.waypoints = by_mission.remove(&mission.id).unwrap_or_default();
            Ok(mission)
        })
        .collect()
}

pub async fn load_mission_ids_by_status(pool: &SqlitePool, status: MissionStatus) -> Result<Vec<MissionId>> {
    let ids: Vec<(i64,)> = sqlx::query_as("SELECT id FROM missions WHERE status = ?1 ORDER BY id")
        .bind(status.as_str())
        .fetch_all(pool)
        .await?;
    Ok(ids.into_iter().map(|(id,)| id).collect())
}

/// Write the full mutable state of a mission. Used for status transitions.
pub async fn update_mission_state(pool: &SqlitePool, mission: &Mission) -> Result<()> {
    let snapshot = mission
        .sim_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE missions SET
            status = ?2,
            current_waypoint_index = ?3,
            progress = ?4,
            distance_traveled_m = ?5,
            sim_snapshot = ?6,
            started_at = ?7,
            completed_at = ?8
        WHERE id = ?1
        "#,
    )
    .bind(mission.id)
    .bind(mission.status.as_str())
    .bind(mission.current_waypoint_index as i64)
    .bind(mission.progress)
    .bind(mission.distance_traveled_m)
    .bind(snapshot)
    .bind(mission.started_at.as_ref().map(encode_time))
    .bind(mission.completed_at.as_ref().map(encode_time))
    .execute(pool)
    .await?;

    if result.rows_affected() == 0 {
        anyhow::bail!("mission {} does not exist", mission.id);
    }
    Ok(())
}

/// Apply a coalesced progress update inside the writer's transaction.
///
/// Updates that would move distance backwards are ignored, so a late write
/// can never undo a newer synchronous transition write.
pub async fn update_progress_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    update: &ProgressUpdate,
) -> Result<bool> {
    let snapshot = update
        .sim_snapshot
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;

    let result = sqlx::query(
        r#"
        UPDATE missions SET
            progress = MAX(progress, ?2),
            current_waypoint_index = MAX(current_waypoint_index, ?3),
            distance_traveled_m = ?4,
            sim_snapshot = COALESCE(?5, sim_snapshot)
        WHERE id = ?1 AND distance_traveled_m <= ?4
        "#,
    )
    .bind(update.mission_id)
    .bind(update.progress)
    .bind(update.current_waypoint_index as i64)
    .bind(update.distance_traveled_m)
    .bind(snapshot)
    .execute(&mut **tx)
    .await?;

    Ok(result.rows_affected() > 0)
}

const SELECT_MISSIONS: &str = "SELECT id, name, status, altitude_m, speed_ms, current_waypoint_index, progress, distance_traveled_m, sim_snapshot, created_at, started_at, completed_at FROM missions";

#[derive(sqlx::FromRow)]
struct MissionRow {
    id: i64,
    name: String,
    status: String,
    altitude_m: f64,
    speed_ms: f64,
    current_waypoint_index: i64,
    progress: f64,
    distance_traveled_m: f64,
    sim_snapshot: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
}

impl TryFrom<MissionRow> for Mission {
    type Error = anyhow::Error;

    fn try_from(row: MissionRow) -> Result<Self> {
        let status: MissionStatus = row.status.parse()?;
        let sim_snapshot = row
            .sim_snapshot
            .as_deref()
            .map(serde_json::from_str::<SimSnapshot>)
            .transpose()
            .with_context(|| format!("bad simulation snapshot for mission {}", row.id))?;

        Ok(Mission {
            id: row.id,
            name: row.name,
            status,
            altitude_m: row.altitude_m,
            speed_ms: row.speed_ms,
            waypoints: Vec::new(),
            current_waypoint_index: row.current_waypoint_index.max(0) as usize,
            progress: row.progress,
            distance_traveled_m: row.distance_traveled_m,
            created_at: decode_time(&row.created_at)?,
            started_at: row.started_at.as_deref().map(decode_time).transpose()?,
            completed_at: row.completed_at.as_deref().map(decode_time).transpose()?,
            sim_snapshot,
        })
    }
}

#[derive(sqlx::FromRow)]
struct WaypointRow {
    mission_id: i64,
    sequence: i64,
    latitude: f64,
    longitude: f64,
    altitude_m: f64,
    action: Option<String>,
    duration_s: f64,
}

impl From<WaypointRow> for Waypoint {
    fn from(row: WaypointRow) -> Self {
        Waypoint {
            sequence: row.sequence as u32,
            latitude: row.latitude,
            longitude: row.longitude,
            altitude_m: row.altitude_m,
            action: row.action,
            duration_s: row.duration_s,
        }
    }
}
