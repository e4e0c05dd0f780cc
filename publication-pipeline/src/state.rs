use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::{debug, info};

use crate::database::Database;
use crate::rate_gate::SourceRunState;
use crate::types::Result;
use crate::utils::{decode_optional_time, encode_time};

/// Durable home of every source's [`SourceRunState`], keyed by the source's
/// config schema name.
#[async_trait]
pub trait RunStateStore: Send + Sync {
    async fn load(&self, name: &str) -> Result<Option<SourceRunState>>;
    async fn save(&self, name: &str, state: &SourceRunState) -> Result<()>;
    /// Forget when `name` last ran so the next tick polls it. Returns whether
    /// a record existed.
    async fn clear_last_run(&self, name: &str) -> Result<bool>;
    async fn list(&self) -> Result<Vec<(String, SourceRunState)>>;
}

pub struct SqliteRunStateStore {
    pool: SqlitePool,
}

impl SqliteRunStateStore {
    pub fn new(database: &Database) -> Self {
        Self { pool: database.pool().clone() }
    }

    fn row_to_state(row: &sqlx::sqlite::SqliteRow) -> Result<SourceRunState> {
        let request_count: i64 = row.try_get("request_count")?;
        Ok(SourceRunState {
            last_run_time: decode_optional_time("last_run_time", row.try_get("last_run_time")?)?,
            request_count: u32::try_from(request_count).unwrap_or(u32::MAX),
            request_window_start: decode_optional_time("request_window_start", row.try_get("request_window_start")?)?,
        })
    }
}

#[async_trait]
impl RunStateStore for SqliteRunStateStore {
    async fn load(&self, name: &str) -> Result<Option<SourceRunState>> {
        let row = sqlx::query(
            "SELECT last_run_time, request_count, request_window_start FROM source_run_state WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_state).transpose()
    }

    async fn save(&self, name: &str, state: &SourceRunState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_run_state (name, last_run_time, request_count, request_window_start, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (name)
            DO UPDATE SET
                last_run_time = excluded.last_run_time,
                request_count = excluded.request_count,
                request_window_start = excluded.request_window_start,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(name)
        .bind(state.last_run_time.map(encode_time))
        .bind(i64::from(state.request_count))
        .bind(state.request_window_start.map(encode_time))
        .bind(encode_time(Utc::now()))
        .execute(&self.pool)
        .await?;

        debug!("Saved run state for {}: {:?}", name, state);
        Ok(())
    }

    async fn clear_last_run(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("UPDATE source_run_state SET last_run_time = NULL, updated_at = ? WHERE name = ?")
            .bind(encode_time(Utc::now()))
            .bind(name)
            .execute(&self.pool)
            .await?;

        let cleared = result.rows_affected() > 0;
        if cleared {
            info!("Cleared last run time for {}", name);
        }
        Ok(cleared)
    }

    async fn list(&self) -> Result<Vec<(String, SourceRunState)>> {
        let rows = sqlx::query(
            "SELECT name, last_run_time, request_count, request_window_start FROM source_run_state ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<(String, SourceRunState)> { Ok((row.try_get("name")?, Self::row_to_state(row)?)) })
            .collect()
    }
}
