use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{BencherError, Result};
use crate::lock::{Acquisition, ExecutionLock};
use crate::runner::ContainerRunner;
use crate::scheduler::job::{validate_version, Job};
use crate::store::JobStore;

/// What `schedule` did with a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scheduled {
    /// Ran to completion in this invocation.
    Ran(Job),
    /// Another invocation held the slot; the job waits in the queue.
    Queued,
}

/// Runs jobs one at a time across every process on the host.
///
/// Processes share nothing in memory. The execution lock bounds running jobs
/// to one and the store's queue holds everything else in FIFO order. The
/// process that finishes a job keeps pulling from the queue until it is empty.
pub struct Scheduler {
    store: Arc<dyn JobStore>,
    lock: Arc<dyn ExecutionLock>,
    runner: ContainerRunner,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn JobStore>,
        lock: Arc<dyn ExecutionLock>,
        runner: ContainerRunner,
    ) -> Self {
        Self {
            store,
            lock,
            runner,
            shutdown: CancellationToken::new(),
        }
    }

    /// Stop draining the queue once `token` is cancelled. A job that is
    /// already running is still waited for.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Run `version` now if the slot is free, otherwise queue it.
    ///
    /// The job's container must already exist. Returns once the job and every
    /// job queued behind it have run, or once it is durably queued.
    pub async fn schedule(&self, version: &str) -> Result<Scheduled> {
        validate_version(version)?;

        match self.lock.try_acquire().await? {
            Acquisition::AlreadyHeld => {
                self.enqueue(version).await?;
                // The holder may have checked the queue before our entry
                // committed and released since; take over if so.
                let ran = self.drain_jobs().await?;
                match ran.into_iter().find(|job| job.version == version) {
                    Some(job) => Ok(Scheduled::Ran(job)),
                    None => Ok(Scheduled::Queued),
                }
            }
            Acquisition::Acquired => {
                let job = self.run_locked(version).await?;
                if let Err(e) = self.drain_jobs().await {
                    tracing::error!(version, error = %e, "Draining the queue failed after the job ran");
                }
                Ok(Scheduled::Ran(job))
            }
        }
    }

    /// Run queued jobs oldest first.
    ///
    /// Stops when the queue is empty, when another invocation holds the slot
    /// (that holder continues the queue), or on shutdown. A job that fails is
    /// left stuck and the queue moves on. Returns how many jobs ran.
    pub async fn drain(&self) -> Result<usize> {
        Ok(self.drain_jobs().await?.len())
    }

    async fn drain_jobs(&self) -> Result<Vec<Job>> {
        let mut ran = Vec::new();
        loop {
            if self.shutdown.is_cancelled() {
                tracing::info!(ran = ran.len(), "Shutdown requested, leaving remaining jobs queued");
                break;
            }
            if self.store.peek_front().await?.is_none() {
                break;
            }
            if self.lock.try_acquire().await? == Acquisition::AlreadyHeld {
                tracing::debug!("Execution slot held elsewhere, leaving the queue to its holder");
                break;
            }

            let next = match self.take_front().await {
                Ok(Some(version)) => version,
                Ok(None) => {
                    self.lock.release().await?;
                    continue;
                }
                Err(e) => {
                    if let Err(release_err) = self.lock.release().await {
                        tracing::error!(error = %release_err, "Failed to release execution lock");
                    }
                    return Err(e);
                }
            };

            // Removed after it was popped: nothing left to run.
            if self.store.find(&next).await?.is_none() {
                tracing::info!(version = %next, "Dequeued job was removed, skipping");
                self.lock.release().await?;
                continue;
            }

            tracing::info!(version = %next, "Dequeued job");
            match self.run_locked(&next).await {
                Ok(job) => ran.push(job),
                Err(e) => {
                    tracing::warn!(version = %next, error = %e, "Queued job failed, moving on");
                }
            }
        }
        Ok(ran)
    }

    /// Pop the front entry, only after observing it. A front that moved
    /// between the two (another invocation removed it) is observed again.
    async fn take_front(&self) -> Result<Option<String>> {
        loop {
            let Some(front) = self.store.peek_front().await? else {
                return Ok(None);
            };
            match self.store.pop_front(&front).await {
                Ok(()) => return Ok(Some(front)),
                Err(BencherError::QueueMismatch { found, .. }) => {
                    tracing::debug!(expected = %front, found = ?found, "Queue front moved, looking again");
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn enqueue(&self, version: &str) -> Result<()> {
        match self.store.insert(&Job::new(version)).await {
            Ok(()) | Err(BencherError::DuplicateJob(_)) => {}
            Err(e) => return Err(e),
        }
        self.store.enqueue(version).await?;
        tracing::info!(version, "Execution slot busy, job queued");
        Ok(())
    }

    /// Run one job while holding the lock. Always releases the lock.
    async fn run_locked(&self, version: &str) -> Result<Job> {
        let outcome = self.execute(version).await;
        let released = self.lock.release().await;

        match outcome {
            Ok(job) => {
                released?;
                self.runner.remove(version, false).await?;
                Ok(job)
            }
            Err(e) => {
                tracing::error!(version, error = %e, "Job run failed, marking it stuck");
                self.mark_stuck(version, &e).await;
                if let Err(release_err) = released {
                    tracing::error!(error = %release_err, "Failed to release execution lock");
                }
                Err(e)
            }
        }
    }

    async fn execute(&self, version: &str) -> Result<Job> {
        self.lock.set_running(version).await?;
        tracing::info!(version, "Running job");

        self.runner.start(version).await?;
        let exit_code = self.runner.wait(version).await?;
        let logs = self.runner.collect_logs(version).await?;

        let mut job = self
            .store
            .find(version)
            .await?
            .unwrap_or_else(|| Job::new(version));
        job.complete(logs, exit_code);
        self.store.save(&job).await?;

        tracing::info!(version, status = %job.status(), exit_code, "Job finished");
        Ok(job)
    }

    /// Leave the container for inspection; the record needs a manual `rm`.
    async fn mark_stuck(&self, version: &str, err: &BencherError) {
        match self.store.find(version).await {
            Ok(Some(mut job)) => {
                job.mark_stuck(err.to_string());
                if let Err(save_err) = self.store.save(&job).await {
                    tracing::error!(version, error = %save_err, "Failed to mark job stuck");
                }
            }
            Ok(None) => tracing::debug!(version, "Job record removed, not marking stuck"),
            Err(find_err) => {
                tracing::error!(version, error = %find_err, "Failed to load job to mark stuck")
            }
        }
    }
}
