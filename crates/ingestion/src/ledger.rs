//! Completion ledger: a per (day, nside) record of what the driver did.
//!
//! The ledger is a cache for operators and the status command. Archive
//! inspection stays authoritative; the scheduler never reads the ledger.

use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use crate::error::{IngestionError, Result};

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS day_status (
        day TEXT NOT NULL,
        nside INTEGER NOT NULL,
        status TEXT NOT NULL,
        attempts INTEGER DEFAULT 0,
        error_message TEXT,
        updated_at TEXT NOT NULL,
        PRIMARY KEY (day, nside)
    )
"#;

/// Recorded outcome of one day at one resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayStatus {
    Completed,
    Failed,
}

impl DayStatus {
    fn as_str(&self) -> &'static str {
        match self {
            DayStatus::Completed => "completed",
            DayStatus::Failed => "failed",
        }
    }

    fn from_str(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(DayStatus::Completed),
            "failed" => Some(DayStatus::Failed),
            _ => None,
        }
    }
}

/// One ledger row.
#[derive(Debug, Clone, Serialize)]
pub struct DayRecord {
    pub day: NaiveDate,
    pub nside: u32,
    pub status: DayStatus,
    pub attempts: u32,
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Counts for the status command.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LedgerStats {
    pub completed: u64,
    pub failed: u64,
    pub last_completed_day: Option<NaiveDate>,
}

/// SQLite-backed completion ledger.
pub struct Ledger {
    pool: SqlitePool,
}

impl Ledger {
    /// Open or create the ledger database at the given path.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| IngestionError::Ledger(e.to_string()))?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_day_status_status ON day_status(status)")
            .execute(&pool)
            .await?;

        info!(path = %path.display(), "Opened completion ledger");
        Ok(Self { pool })
    }

    /// Open an in-memory ledger (for testing).
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    /// Record that `day` is committed at `nside`.
    pub async fn mark_completed(&self, day: NaiveDate, nside: u32) -> Result<()> {
        self.upsert(day, nside, DayStatus::Completed, None).await
    }

    /// Record a failed attempt at `day`, `nside`.
    pub async fn mark_failed(&self, day: NaiveDate, nside: u32, error: &str) -> Result<()> {
        self.upsert(day, nside, DayStatus::Failed, Some(error)).await
    }

    async fn upsert(
        &self,
        day: NaiveDate,
        nside: u32,
        status: DayStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO day_status (day, nside, status, attempts, error_message, updated_at)
            VALUES (?, ?, ?, 1, ?, ?)
            ON CONFLICT(day, nside) DO UPDATE SET
                status = excluded.status,
                attempts = day_status.attempts + 1,
                error_message = excluded.error_message,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(day.to_string())
        .bind(nside as i64)
        .bind(status.as_str())
        .bind(error)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        debug!(day = %day, nside, status = status.as_str(), "Updated ledger");
        Ok(())
    }

    /// Drop the marker for `day`, `nside`.
    pub async fn reset(&self, day: NaiveDate, nside: u32) -> Result<()> {
        sqlx::query("DELETE FROM day_status WHERE day = ? AND nside = ?")
            .bind(day.to_string())
            .bind(nside as i64)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// The record for `day`, `nside`, if any.
    pub async fn get(&self, day: NaiveDate, nside: u32) -> Result<Option<DayRecord>> {
        let row: Option<(String, i64, String, i64, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT day, nside, status, attempts, error_message, updated_at
            FROM day_status WHERE day = ? AND nside = ?
            "#,
        )
        .bind(day.to_string())
        .bind(nside as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(to_record))
    }

    /// Every failed record, oldest day first.
    pub async fn failures(&self) -> Result<Vec<DayRecord>> {
        let rows: Vec<(String, i64, String, i64, Option<String>, String)> = sqlx::query_as(
            r#"
            SELECT day, nside, status, attempts, error_message, updated_at
            FROM day_status WHERE status = 'failed'
            ORDER BY day ASC, nside ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(to_record).collect())
    }

    /// Ledger statistics.
    pub async fn stats(&self) -> Result<LedgerStats> {
        let completed: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM day_status WHERE status = 'completed'")
                .fetch_one(&self.pool)
                .await?;

        let failed: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM day_status WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;

        let last: (Option<String>,) =
            sqlx::query_as("SELECT MAX(day) FROM day_status WHERE status = 'completed'")
                .fetch_one(&self.pool)
                .await?;

        Ok(LedgerStats {
            completed: completed.0 as u64,
            failed: failed.0 as u64,
            last_completed_day: last.0.and_then(|d| d.parse().ok()),
        })
    }
}

fn to_record(row: (String, i64, String, i64, Option<String>, String)) -> Option<DayRecord> {
    Some(DayRecord {
        day: row.0.parse().ok()?,
        nside: row.1 as u32,
        status: DayStatus::from_str(&row.2)?,
        attempts: row.3 as u32,
        error_message: row.4,
        updated_at: DateTime::parse_from_rfc3339(&row.5)
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now()),
    })
}
