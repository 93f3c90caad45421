use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use super::JobStore;
use crate::error::{BencherError, Result};
use crate::scheduler::job::validate_version;
use crate::scheduler::Job;

/// Concurrent invocations wait this long on each other's write transactions.
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

const MAX_CONNECTIONS: u32 = 4;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        version TEXT PRIMARY KEY NOT NULL,
        data    TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS sched (
        seq     INTEGER PRIMARY KEY AUTOINCREMENT,
        version TEXT NOT NULL UNIQUE
    )",
];

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// Job store backed by one SQLite file shared by every invocation on the host.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and its tables.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .connect_with(options)
            .await?;

        for statement in SCHEMA {
            sqlx::query(*statement).execute(&pool).await?;
        }

        tracing::debug!(path = %path.display(), "Opened job store");
        Ok(Self { pool })
    }

    /// Shared pool, also used by the lease lock.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn find(&self, version: &str) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT data FROM jobs WHERE version = ?")
            .bind(version)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let data: String = row.try_get("data")?;
                Ok(Some(serde_json::from_str(&data)?))
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<Job>> {
        let rows = sqlx::query("SELECT data FROM jobs ORDER BY version")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| -> Result<Job> {
                let data: String = row.try_get("data")?;
                Ok(serde_json::from_str(&data)?)
            })
            .collect()
    }

    async fn save(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(job)?;
        sqlx::query(
            "INSERT INTO jobs (version, data) VALUES (?, ?)
             ON CONFLICT(version) DO UPDATE SET data = excluded.data",
        )
        .bind(&job.version)
        .bind(data)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        let data = serde_json::to_string(job)?;
        sqlx::query("INSERT INTO jobs (version, data) VALUES (?, ?)")
            .bind(&job.version)
            .bind(data)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    BencherError::DuplicateJob(job.version.clone())
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    async fn delete(&self, versions: &[String]) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let mut removed = Vec::new();
        for version in versions {
            let result = sqlx::query("DELETE FROM jobs WHERE version = ?")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                removed.push(version.clone());
            }
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn enqueue(&self, version: &str) -> Result<()> {
        validate_version(version)?;
        sqlx::query("INSERT INTO sched (version) VALUES (?)")
            .bind(version)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    BencherError::DuplicateJob(version.to_string())
                } else {
                    e.into()
                }
            })?;
        Ok(())
    }

    async fn peek_front(&self) -> Result<Option<String>> {
        let row = sqlx::query("SELECT version FROM sched ORDER BY seq LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.try_get::<String, _>("version")).transpose()?)
    }

    async fn pop_front(&self, version: &str) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM sched
             WHERE version = ? AND seq = (SELECT MIN(seq) FROM sched)",
        )
        .bind(version)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(BencherError::QueueMismatch {
                expected: version.to_string(),
                found: self.peek_front().await?,
            });
        }
        Ok(())
    }

    async fn queue(&self) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT version FROM sched ORDER BY seq")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|r| r.try_get::<String, _>("version"))
            .collect::<std::result::Result<_, _>>()?)
    }

    async fn dequeue(&self, versions: &[String]) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await?;
        let mut removed = Vec::new();
        for version in versions {
            let result = sqlx::query("DELETE FROM sched WHERE version = ?")
                .bind(version)
                .execute(&mut *tx)
                .await?;
            if result.rows_affected() > 0 {
                removed.push(version.clone());
            }
        }
        tx.commit().await?;
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM jobs").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM sched").execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }
}
