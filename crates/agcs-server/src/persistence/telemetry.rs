//! Append-only telemetry sample storage.

use anyhow::Result;
use sqlx::{Sqlite, SqlitePool};

use agcs_core::models::{MissionId, TelemetrySample};

use super::db::{decode_time, encode_time};

pub async fn insert_sample_tx(
    tx: &mut sqlx::Transaction<'_, Sqlite>,
    sample: &TelemetrySample,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO telemetry_samples (
            mission_id, timestamp, lat, lon, altitude_m, speed_ms, battery_percent,
            heading_deg, roll_deg, pitch_deg, yaw_deg, gps_fix_type, satellites_visible,
            ground_speed_ms, vertical_speed_ms
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
        "#,
    )
    .bind(sample.mission_id)
    .bind(encode_time(&sample.timestamp))
    .bind(sample.lat)
    .bind(sample.lon)
    .bind(sample.altitude_m)
    .bind(sample.speed_ms)
    .bind(sample.battery_percent)
    .bind(sample.heading_deg)
    .bind(sample.roll_deg)
    .bind(sample.pitch_deg)
    .bind(sample.yaw_deg)
    .bind(i64::from(sample.gps_fix_type))
    .bind(i64::from(sample.satellites_visible))
    .bind(sample.ground_speed_ms)
    .bind(sample.vertical_speed_ms)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

/// Persisted samples for a mission in timestamp order.
pub async fn load_history(
    pool: &SqlitePool,
    mission_id: MissionId,
    offset: i64,
    limit: i64,
) -> Result<Vec<TelemetrySample>> {
    let rows = sqlx::query_as::<_, SampleRow>(&format!(
        "{} WHERE mission_id = ?1 ORDER BY timestamp ASC, id ASC LIMIT ?2 OFFSET ?3",
        SELECT_SAMPLES
    ))
    .bind(mission_id)
    .bind(limit.max(0))
    .bind(offset.max(0))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

/// The most recent `limit` samples, oldest first.
pub async fn load_recent(pool: &SqlitePool, mission_id: MissionId, limit: i64) -> Result<Vec<TelemetrySample>> {
    let rows = sqlx::query_as::<_, SampleRow>(&format!(
        "{} WHERE mission_id = ?1 ORDER BY timestamp DESC, id DESC LIMIT ?2",
        SELECT_SAMPLES
    ))
    .bind(mission_id)
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;

    let mut samples: Vec<TelemetrySample> = rows
        .into_iter()
        .map(TryInto::try_into)
        .collect::<Result<_>>()?;
    samples.reverse();
    Ok(samples)
}

const SELECT_SAMPLES: &str = "SELECT mission_id, timestamp, lat, lon, altitude_m, speed_ms, battery_percent, heading_deg, roll_deg, pitch_deg, yaw_deg, gps_fix_type, satellites_visible, ground_speed_ms, vertical_speed_ms FROM telemetry_samples";

#[derive(sqlx::FromRow)]
struct SampleRow {
    mission_id: i64,
    timestamp: String,
    lat: f64,
    lon: f64,
    altitude_m: f64,
    speed_ms: f64,
    battery_percent: f64,
    heading_deg: f64,
    roll_deg: f64,
    pitch_deg: f64,
    yaw_deg: f64,
    gps_fix_type: i64,
    satellites_visible: i64,
    ground_speed_ms: Option<f64>,
    vertical_speed_ms: Option<f64>,
}

impl TryFrom<SampleRow> for TelemetrySample {
    type Error = anyhow::Error;

    fn try_from(row: SampleRow) -> Result<Self> {
        Ok(TelemetrySample {
            mission_id: row.mission_id,
            timestamp: decode_time(&row.timestamp)?,
            lat: row.lat,
            lon: row.lon,
            altitude_m: row.altitude_m,
            speed_ms: row.speed_ms,
            battery_percent: row.battery_percent,
            heading_deg: row.heading_deg,
            roll_deg: row.roll_deg,
            pitch_deg: row.pitch_deg,
            yaw_deg: row.yaw_deg,
            gps_fix_type: row.gps_fix_type.clamp(0, u8::MAX as i64) as u8,
            satellites_visible: row.satellites_visible.clamp(0, u8::MAX as i64) as u8,
            ground_speed_ms: row.ground_speed_ms,
            vertical_speed_ms: row.vertical_speed_ms,
        })
    }
}
