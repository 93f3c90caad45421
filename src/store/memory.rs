use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::JobStore;
use crate::error::{BencherError, Result};
use crate::scheduler::job::validate_version;
use crate::scheduler::Job;

#[derive(Debug, Default)]
struct Inner {
    jobs: BTreeMap<String, Job>,
    queue: VecDeque<String>,
}

/// In-process store. Not durable; one instance per test.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn find(&self, version: &str) -> Result<Option<Job>> {
        Ok(self.inner.lock().await.jobs.get(version).cloned())
    }

    async fn list(&self) -> Result<Vec<Job>> {
        Ok(self.inner.lock().await.jobs.values().cloned().collect())
    }

    async fn save(&self, job: &Job) -> Result<()> {
        self.inner
            .lock()
            .await
            .jobs
            .insert(job.version.clone(), job.clone());
        Ok(())
    }

    async fn insert(&self, job: &Job) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.version) {
            return Err(BencherError::DuplicateJob(job.version.clone()));
        }
        inner.jobs.insert(job.version.clone(), job.clone());
        Ok(())
    }

    async fn delete(&self, versions: &[String]) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        Ok(versions
            .iter()
            .filter(|v| inner.jobs.remove(v.as_str()).is_some())
            .cloned()
            .collect())
    }

    async fn enqueue(&self, version: &str) -> Result<()> {
        validate_version(version)?;
        let mut inner = self.inner.lock().await;
        if inner.queue.iter().any(|v| v == version) {
            return Err(BencherError::DuplicateJob(version.to_string()));
        }
        inner.queue.push_back(version.to_string());
        Ok(())
    }

    async fn peek_front(&self) -> Result<Option<String>> {
        Ok(self.inner.lock().await.queue.front().cloned())
    }

    async fn pop_front(&self, version: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.queue.front() {
            Some(front) if front == version => {
                inner.queue.pop_front();
                Ok(())
            }
            found => Err(BencherError::QueueMismatch {
                expected: version.to_string(),
                found: found.cloned(),
            }),
        }
    }

    async fn queue(&self) -> Result<Vec<String>> {
        Ok(self.inner.lock().await.queue.iter().cloned().collect())
    }

    async fn dequeue(&self, versions: &[String]) -> Result<Vec<String>> {
        let mut inner = self.inner.lock().await;
        let mut removed = Vec::new();
        inner.queue.retain(|queued| {
            if versions.contains(queued) {
                removed.push(queued.clone());
                false
            } else {
                true
            }
        });
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.jobs.clear();
        inner.queue.clear();
        Ok(())
    }
}
