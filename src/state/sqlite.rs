//! SQLite thread-state backend
//!
//! One row per thread with the document stored as JSON text and a version
//! column for compare-and-swap writes. WAL mode keeps worker reads from
//! blocking the tick's writes.

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;

use super::{PatchOutcome, ThreadState, ThreadStateStore, VersionedState};
use crate::error::{EngineError, Result};

/// SQLite-backed thread-state store
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open or create a SQLite database at the specified path
    pub async fn open(path: &str) -> Result<Self> {
        let db_url = if path.starts_with("sqlite://") {
            path.to_string()
        } else {
            format!("sqlite://{path}")
        };

        let options = SqliteConnectOptions::from_str(&db_url)
            .map_err(|e| EngineError::Store(format!("sqlite options: {e}")))?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| EngineError::Store(format!("sqlite connect: {e}")))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS thread_states (
                 thread_id  TEXT PRIMARY KEY,
                 version    INTEGER NOT NULL,
                 state      TEXT NOT NULL,
                 updated_at TEXT NOT NULL DEFAULT (datetime('now'))
             )",
        )
        .execute(&pool)
        .await
        .map_err(|e| EngineError::Store(format!("sqlite schema: {e}")))?;

        Ok(Self { pool })
    }

    /// Get the underlying pool (for advanced usage)
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl ThreadStateStore for SqliteStateStore {
    async fn load(&self, thread_id: &str) -> Result<Option<VersionedState>> {
        let row = sqlx::query("SELECT version, state FROM thread_states WHERE thread_id = ?")
            .bind(thread_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| EngineError::Store(format!("sqlite load: {e}")))?;

        match row {
            Some(row) => {
                let version: i64 = row
                    .try_get("version")
                    .map_err(|e| EngineError::Store(format!("sqlite row: {e}")))?;
                let raw: String = row
                    .try_get("state")
                    .map_err(|e| EngineError::Store(format!("sqlite row: {e}")))?;
                let state: ThreadState = serde_json::from_str(&raw)?;
                Ok(Some(VersionedState {
                    state,
                    version: version as u64,
                }))
            }
            None => Ok(None),
        }
    }

    async fn create(&self, thread_id: &str, state: ThreadState) -> Result<u64> {
        let raw = serde_json::to_string(&state)?;
        let result = sqlx::query(
            "INSERT OR IGNORE INTO thread_states (thread_id, version, state) VALUES (?, 1, ?)",
        )
        .bind(thread_id)
        .bind(&raw)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Store(format!("sqlite create: {e}")))?;

        if result.rows_affected() == 0 {
            return Err(EngineError::Store(format!(
                "thread {thread_id} already exists"
            )));
        }
        Ok(1)
    }

    async fn patch(
        &self,
        thread_id: &str,
        expected_version: u64,
        state: ThreadState,
    ) -> Result<PatchOutcome> {
        let raw = serde_json::to_string(&state)?;
        let result = sqlx::query(
            "UPDATE thread_states
             SET version = version + 1, state = ?, updated_at = datetime('now')
             WHERE thread_id = ? AND version = ?",
        )
        .bind(&raw)
        .bind(thread_id)
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| EngineError::Store(format!("sqlite patch: {e}")))?;

        if result.rows_affected() == 1 {
            return Ok(PatchOutcome::Applied(expected_version + 1));
        }

        // Distinguish a missing row from a stale version
        let exists =
            sqlx::query("SELECT 1 AS present FROM thread_states WHERE thread_id = ?")
                .bind(thread_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| EngineError::Store(format!("sqlite patch: {e}")))?
                .is_some();
        if exists {
            Ok(PatchOutcome::Conflict)
        } else {
            Err(EngineError::ThreadNotFound(thread_id.to_string()))
        }
    }
}
