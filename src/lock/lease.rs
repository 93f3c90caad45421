use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use super::{Acquisition, ExecutionLock, LockStatus};
use crate::error::{BencherError, Result};

/// Lock held while the single lease row exists.
///
/// The `CHECK (slot = 0)` primary key admits one row, so a second insert
/// fails with a constraint violation inside the database's own transaction.
#[derive(Debug, Clone)]
pub struct LeaseLock {
    pool: SqlitePool,
}

impl LeaseLock {
    pub async fn new(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS lease (
                slot        INTEGER PRIMARY KEY CHECK (slot = 0),
                running     TEXT,
                acquired_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl ExecutionLock for LeaseLock {
    async fn try_acquire(&self) -> Result<Acquisition> {
        let inserted = sqlx::query("INSERT INTO lease (slot, acquired_at) VALUES (0, ?)")
            .bind(Utc::now().to_rfc3339())
            .execute(&self.pool)
            .await;

        match inserted {
            Ok(_) => {
                tracing::debug!("Execution lease acquired");
                Ok(Acquisition::Acquired)
            }
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Ok(Acquisition::AlreadyHeld)
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn set_running(&self, version: &str) -> Result<()> {
        sqlx::query("UPDATE lease SET running = ? WHERE slot = 0")
            .bind(version)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM lease WHERE slot = 0")
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(BencherError::Lock("release of lease without holding it".into()));
        }
        tracing::debug!("Execution lease released");
        Ok(())
    }

    async fn status(&self) -> Result<LockStatus> {
        let row = sqlx::query("SELECT running FROM lease WHERE slot = 0")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(LockStatus::Held {
                running: row.try_get("running")?,
            }),
            None => Ok(LockStatus::Free),
        }
    }

    async fn force_release(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM lease").execute(&self.pool).await?;
        if result.rows_affected() > 0 {
            tracing::warn!("Execution lease force-released");
        }
        Ok(())
    }
}
