//! Analysis insight storage.

use anyhow::Result;
use sqlx::SqlitePool;

use agcs_core::models::{Insight, InsightKind, MissionId};

use super::db::{decode_time, encode_time};

pub async fn insert_insight(pool: &SqlitePool, insight: &Insight) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO insights (mission_id, timestamp, kind, confidence, is_alert, message, data)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(insight.mission_id)
    .bind(encode_time(&insight.timestamp))
    .bind(insight.kind.as_str())
    .bind(insight.confidence)
    .bind(insight.is_alert)
    .bind(&insight.message)
    .bind(serde_json::to_string(&insight.data)?)
    .execute(pool)
    .await?;

    Ok(())
}

/// Most recent insights first.
pub async fn list_insights(
    pool: &SqlitePool,
    mission_id: MissionId,
    kind: Option<InsightKind>,
    limit: i64,
) -> Result<Vec<Insight>> {
    let rows = sqlx::query_as::<_, InsightRow>(
        r#"
        SELECT mission_id, timestamp, kind, confidence, is_alert, message, data
        FROM insights
        WHERE mission_id = ?1 AND (?2 IS NULL OR kind = ?2)
        ORDER BY id DESC
        LIMIT ?3
        "#,
    )
    .bind(mission_id)
    .bind(kind.map(|k| k.as_str()))
    .bind(limit.max(0))
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(TryInto::try_into).collect()
}

#[derive(sqlx::FromRow)]
struct InsightRow {
    mission_id: i64,
    timestamp: String,
    kind: String,
    confidence: f64,
    is_alert: bool,
    message: String,
    data: String,
}

impl TryFrom<InsightRow> for Insight {
    type Error = anyhow::Error;

    fn try_from(row: InsightRow) -> Result<Self> {
        Ok(Insight {
            mission_id: row.mission_id,
            timestamp: decode_time(&row.timestamp)?,
            kind: row.kind.parse()?,
            confidence: row.confidence,
            is_alert: row.is_alert,
            message: row.message,
            data: serde_json::from_str(&row.data)?,
        })
    }
}
