//! Mission log sink.

use anyhow::Result;
use sqlx::SqlitePool;

use agcs_core::models::{LogLevel, MissionId, MissionLogEntry};

use super::db::{decode_time, encode_time};

pub async fn insert_log(pool: &SqlitePool, entry: &MissionLogEntry) -> Result<()> {
    let data = entry.data.as_ref().map(serde_json::to_string).transpose()?;

    sqlx::query(
        "INSERT INTO mission_logs (mission_id, timestamp, level, message, data) VALUES (?1, ?2, ?3, ?4, ?5)",
    )
    .bind(entry.mission_id)
    .bind(encode_time(&entry.timestamp))
    .bind(entry.level.as_str())
    .bind(&entry.message)
    .bind(data)
    .execute(pool)
    .await?;

    Ok(())
}

/// Log entries in insertion order, optionally filtered by level.
pub async fn list_logs(
    pool: &SqlitePool,
    mission_id: MissionId,
    level: Option<LogLevel>,
    limit: i64,
) -> Result<Vec<MissionLogEntry>> {
    let rows = sqlx::query_as::<_, LogRow>(
        r#"
        SELECT mission_id, timestamp, level, message, data
        FROM mission_logs
        WHERE mission_id = ?1 AND (?2 IS NULL OR level = ?2)
        ORDER BY id ASC
        LIMIT ?3
        "#,
    )
    .bind(mission_id)
    .bind(level.map(|l| l.as_str()))
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

#[derive(sqlx::FromRow)]
struct LogRow {
    mission_id: i64,
    timestamp: String,
    level: String,
    message: String,
    data: Option<String>,
}

impl TryFrom<LogRow> for MissionLogEntry {
    type Error = anyhow::Error;

    fn try_from(row: LogRow) -> Result<Self> {
        Ok(MissionLogEntry {
            mission_id: row.mission_id,
            timestamp: decode_time(&row.timestamp)?,
            level: row.level.parse()?,
            message: row.message,
            data: row.data.as_deref().map(serde_json::from_str).transpose()?,
        })
    }
}
