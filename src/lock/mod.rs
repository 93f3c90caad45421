//! The single execution slot shared by every invocation on the host.
//!
//! [`ExecutionLock`] is the seam: the scheduler only sees `try_acquire`,
//! `set_running` and `release`, so the backing primitive can be swapped.
//!
//! - [`FileLock`]: exclusive creation of a sentinel file plus a run marker
//! - [`LeaseLock`]: a single-row lease table in the job database

pub mod file;
pub mod lease;

pub use file::FileLock;
pub use lease::LeaseLock;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;

/// Outcome of an acquire attempt. Contention is a normal outcome, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition {
    Acquired,
    AlreadyHeld,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum LockStatus {
    Free,
    /// `running` is unset between acquiring and recording the job.
    Held { running: Option<String> },
}

impl LockStatus {
    pub fn running(&self) -> Option<&str> {
        match self {
            LockStatus::Held { running } => running.as_deref(),
            LockStatus::Free => None,
        }
    }
}

#[async_trait]
pub trait ExecutionLock: Send + Sync {
    /// Take the slot if nobody holds it.
    async fn try_acquire(&self) -> Result<Acquisition>;

    /// Record which job the holder is running, for status reporting.
    async fn set_running(&self, version: &str) -> Result<()>;

    /// Give the slot back. Exactly once per successful acquire.
    async fn release(&self) -> Result<()>;

    async fn status(&self) -> Result<LockStatus>;

    /// Clear the slot regardless of who holds it, e.g. after a crash.
    async fn force_release(&self) -> Result<()>;

    async fn is_held(&self) -> Result<bool> {
        Ok(matches!(self.status().await?, LockStatus::Held { .. }))
    }
}
