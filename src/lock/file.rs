use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;

use super::{Acquisition, ExecutionLock, LockStatus};
use crate::error::{BencherError, Result};

/// Lock held while the sentinel file exists.
///
/// Acquisition is `O_CREAT | O_EXCL`, so two processes racing for it cannot
/// both succeed. The running job is kept in a separate marker file.
#[derive(Debug, Clone)]
pub struct FileLock {
    sentinel: PathBuf,
    marker: PathBuf,
}

async fn remove_if_exists(path: &Path) -> std::io::Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

impl FileLock {
    pub fn new(sentinel: impl Into<PathBuf>, marker: impl Into<PathBuf>) -> Self {
        Self {
            sentinel: sentinel.into(),
            marker: marker.into(),
        }
    }

    pub fn sentinel(&self) -> &Path {
        &self.sentinel
    }
}

#[async_trait]
impl ExecutionLock for FileLock {
    async fn try_acquire(&self) -> Result<Acquisition> {
        if let Some(parent) = self.sentinel.parent() {
            fs::create_dir_all(parent).await?;
        }

        let created = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.sentinel)
            .await;

        match created {
            Ok(_) => {
                tracing::debug!(sentinel = %self.sentinel.display(), "Execution lock acquired");
                Ok(Acquisition::Acquired)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(Acquisition::AlreadyHeld),
            Err(e) => Err(BencherError::Lock(format!(
                "create {}: {}",
                self.sentinel.display(),
                e
            ))),
        }
    }

    async fn set_running(&self, version: &str) -> Result<()> {
        fs::write(&self.marker, version).await?;
        Ok(())
    }

    async fn release(&self) -> Result<()> {
        remove_if_exists(&self.marker).await?;
        if !remove_if_exists(&self.sentinel).await? {
            return Err(BencherError::Lock(format!(
                "release of {} without holding it",
                self.sentinel.display()
            )));
        }
        tracing::debug!(sentinel = %self.sentinel.display(), "Execution lock released");
        Ok(())
    }

    async fn status(&self) -> Result<LockStatus> {
        if !fs::try_exists(&self.sentinel).await? {
            return Ok(LockStatus::Free);
        }
        let running = match fs::read_to_string(&self.marker).await {
            Ok(v) if !v.is_empty() => Some(v),
            Ok(_) => None,
            Err(e) if e.kind() == ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(LockStatus::Held { running })
    }

    async fn force_release(&self) -> Result<()> {
        remove_if_exists(&self.marker).await?;
        if remove_if_exists(&self.sentinel).await? {
            tracing::warn!(sentinel = %self.sentinel.display(), "Execution lock force-released");
        }
        Ok(())
    }
}
