//! Durable job records and the pending queue.
//!
//! Both collections live behind [`JobStore`]. Every mutating call is a single
//! transaction, so independently launched processes sharing one store never
//! observe a half-applied write.
//!
//! - [`SqliteStore`]: one SQLite file with a `jobs` table and a `sched` table
//!   ordered by an autoincrement key
//! - [`MemoryStore`]: single-process store for tests

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;

use crate::error::{BencherError, Result};
use crate::scheduler::Job;

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Look up a job record.
    async fn find(&self, version: &str) -> Result<Option<Job>>;

    /// All job records, in store order.
    async fn list(&self) -> Result<Vec<Job>>;

    /// Insert or overwrite a job record.
    async fn save(&self, job: &Job) -> Result<()>;

    /// Insert a record that must not exist yet.
    async fn insert(&self, job: &Job) -> Result<()>;

    /// Delete records; returns the versions that were present.
    async fn delete(&self, versions: &[String]) -> Result<Vec<String>>;

    /// Append to the tail of the queue.
    async fn enqueue(&self, version: &str) -> Result<()>;

    /// The oldest queued version, without removing it.
    async fn peek_front(&self) -> Result<Option<String>>;

    /// Remove the front entry, which must be `version`.
    ///
    /// Fails with [`BencherError::QueueMismatch`] and leaves the queue as it
    /// was when the front is anything else.
    async fn pop_front(&self, version: &str) -> Result<()>;

    /// Queued versions, oldest first.
    async fn queue(&self) -> Result<Vec<String>>;

    /// Remove queued entries wherever they sit; the rest keep their order.
    async fn dequeue(&self, versions: &[String]) -> Result<Vec<String>>;

    /// Drop every job record and the whole queue.
    async fn clear(&self) -> Result<()>;

    async fn get(&self, version: &str) -> Result<Job> {
        self.find(version)
            .await?
            .ok_or_else(|| BencherError::JobNotFound(version.to_string()))
    }
}
