//! Flash log: one row per accepted trigger-flash.
use chrono::Utc;
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};

use crate::error::AppResult;

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct FlashRecord {
    pub event_id:     String,
    pub triggered_by: Option<String>,
    pub color:        String,
    pub duration:     i64,
    pub pattern:      Option<String>,
    pub active_users: i64,
    pub created_at:   i64,   // epoch ms
}

#[derive(Clone)]
pub struct FlashLog { pool: SqlitePool }

impl FlashLog {
    pub async fn connect(url: &str) -> AppResult<Self> {
        // in-memory sqlite is per connection
        let max = if url.contains(":memory:") { 1 } else { 4 };
        let pool = SqlitePoolOptions::new().max_connections(max).connect(url).await?;
        let log = Self { pool };
        log.migrate().await?;
        Ok(log)
    }

    async fn migrate(&self) -> AppResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS flash_log (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id     TEXT    NOT NULL,
                triggered_by TEXT,
                color        TEXT    NOT NULL,
                duration     INTEGER NOT NULL,
                pattern      TEXT,
                active_users INTEGER NOT NULL,
                created_at   INTEGER NOT NULL
            )")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS flash_log_event ON flash_log (event_id, id)")
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record(&self, r: &FlashRecord) -> AppResult<()> {
        sqlx::query("INSERT INTO flash_log
                     (event_id, triggered_by, color, duration, pattern, active_users, created_at)
                     VALUES (?,?,?,?,?,?,?)")
            .bind(&r.event_id)
            .bind(&r.triggered_by)
            .bind(&r.color)
            .bind(r.duration)
            .bind(&r.pattern)
            .bind(r.active_users)
            .bind(r.created_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Newest first.
    pub async fn recent(&self, event_id: &str, limit: u32) -> AppResult<Vec<FlashRecord>> {
        Ok(sqlx::query_as(
            "SELECT event_id, triggered_by, color, duration, pattern, active_users, created_at
             FROM flash_log WHERE event_id = ? ORDER BY id DESC LIMIT ?")
            .bind(event_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }
}

impl FlashRecord {
    pub fn now(event_id: &str, triggered_by: Option<String>, color: &str,
               duration: u64, pattern: Option<String>, active_users: usize) -> Self {
        Self {
            event_id: event_id.into(),
            triggered_by,
            color: color.into(),
            duration: i64::try_from(duration).unwrap_or(i64::MAX),
            pattern,
            active_users: active_users as i64,
            created_at: Utc::now().timestamp_millis(),
        }
    }
}
