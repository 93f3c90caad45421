use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{BencherConfig, LockBackend, CONTAINERS_LABEL, RUNNER_ROLE, SERVER_ROLE};
use crate::error::{BencherError, Result};
use crate::lock::{ExecutionLock, FileLock, LeaseLock, LockStatus};
use crate::runner::{ContainerEngine, ContainerRunner, ContainerSpec, DockerEngine, Mount};
use crate::scheduler::dispatch;
use crate::scheduler::job::validate_version;
use crate::scheduler::{Job, JobStatus, Scheduled, Scheduler};
use crate::store::{JobStore, SqliteStore};

/// A benchmark to run.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub version: String,
    /// Host directory mounted into the sandbox
    pub workspace: PathBuf,
    /// Directory relative to the workspace to run the command in
    pub workdir: Option<String>,
    /// Empty, or `.`, means the sandbox default command
    pub command: Vec<String>,
}

impl JobRequest {
    pub fn new(version: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            version: version.into(),
            workspace: workspace.into(),
            workdir: None,
            command: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_workdir(mut self, workdir: impl Into<String>) -> Self {
        self.workdir = Some(workdir.into());
        self
    }
}

/// Where a job is in its life, as seen from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Running,
    /// Position in the queue, 0 is next.
    Queued(usize),
    Settled(JobStatus),
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Running => write!(f, "running"),
            Phase::Queued(order) => write!(f, "scheduled at order #{}", order),
            Phase::Settled(status) => write!(f, "{}", status),
        }
    }
}

/// Everything known about jobs at one instant.
#[derive(Debug, Clone, Serialize)]
pub struct Overview {
    pub jobs: Vec<Job>,
    pub running: Option<String>,
    pub queue: Vec<String>,
}

impl Overview {
    pub fn phase(&self, version: &str) -> Option<Phase> {
        if self.running.as_deref() == Some(version) {
            return Some(Phase::Running);
        }
        if let Some(order) = self.queue.iter().position(|v| v == version) {
            return Some(Phase::Queued(order));
        }
        self.jobs
            .iter()
            .find(|j| j.version == version)
            .map(|j| Phase::Settled(j.status()))
    }
}

/// What `remove` touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Removed {
    pub dequeued: Vec<String>,
    pub deleted: Vec<String>,
    pub stopped: Option<String>,
    /// Versions whose container could not be removed; their workspaces stay.
    pub failed: Vec<String>,
}

/// Entry point for every command: one store, one lock, one engine, all
/// derived from a [`BencherConfig`].
pub struct Bencher {
    config: BencherConfig,
    store: Arc<dyn JobStore>,
    lock: Arc<dyn ExecutionLock>,
    runner: ContainerRunner,
    scheduler: Scheduler,
}

impl Bencher {
    /// Open the host's state and talk to the configured Docker daemon.
    pub async fn open(config: BencherConfig) -> Result<Self> {
        let engine = Arc::new(DockerEngine::new(&config.engine));
        Self::open_with_engine(config, engine).await
    }

    /// Open the host's state with a caller-provided engine.
    pub async fn open_with_engine(
        config: BencherConfig,
        engine: Arc<dyn ContainerEngine>,
    ) -> Result<Self> {
        let store = SqliteStore::open(config.db_path()).await?;
        let lock: Arc<dyn ExecutionLock> = match config.lock_backend {
            LockBackend::File => Arc::new(FileLock::new(config.lock_path(), config.marker_path())),
            LockBackend::Lease => Arc::new(LeaseLock::new(store.pool().clone()).await?),
        };
        Ok(Self::from_parts(config, Arc::new(store), lock, engine))
    }

    pub fn from_parts(
        config: BencherConfig,
        store: Arc<dyn JobStore>,
        lock: Arc<dyn ExecutionLock>,
        engine: Arc<dyn ContainerEngine>,
    ) -> Self {
        let runner = ContainerRunner::new(engine);
        let scheduler = Scheduler::new(store.clone(), lock.clone(), runner.clone());
        Self {
            config,
            store,
            lock,
            runner,
            scheduler,
        }
    }

    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.scheduler = self.scheduler.with_shutdown(token);
        self
    }

    pub fn config(&self) -> &BencherConfig {
        &self.config
    }

    fn job_spec(&self, request: &JobRequest) -> ContainerSpec {
        let sandbox = &self.config.sandbox;
        // "." runs the default command in the working directory.
        let command = if request.command.is_empty() || request.command == ["."] {
            sandbox.default_command.clone()
        } else {
            request.command.clone()
        };
        let working_dir = match request.workdir.as_deref().map(|w| w.trim_matches('/')) {
            Some(rel) if !rel.is_empty() && rel != "." => {
                format!("{}/{}", sandbox.mount_target.trim_end_matches('/'), rel)
            }
            _ => sandbox.mount_target.clone(),
        };

        ContainerSpec {
            name: request.version.clone(),
            image: sandbox.image.clone(),
            command,
            entrypoint: sandbox.reset_entrypoint.then(|| vec![String::new()]),
            working_dir: Some(working_dir),
            mounts: vec![Mount::bind(
                request.workspace.to_string_lossy(),
                sandbox.mount_target.clone(),
            )],
            env: sandbox.env.clone(),
            labels: BTreeMap::from([(CONTAINERS_LABEL.to_string(), RUNNER_ROLE.to_string())]),
        }
    }

    /// Create the job's container and its pending record, without scheduling.
    ///
    /// The container name is the job name, so a second submission of the same
    /// version fails with [`BencherError::DuplicateJob`].
    pub async fn prepare(&self, request: &JobRequest) -> Result<()> {
        validate_version(&request.version)?;
        if self.store.find(&request.version).await?.is_some() {
            return Err(BencherError::DuplicateJob(request.version.clone()));
        }

        self.runner.create_job(&self.job_spec(request)).await?;
        if let Err(e) = self.store.insert(&Job::new(&request.version)).await {
            // Lost a race with another submission of the same version.
            self.runner.remove(&request.version, false).await?;
            return Err(e);
        }
        tracing::info!(version = %request.version, "Job prepared");
        Ok(())
    }

    /// Prepare and schedule in this invocation.
    pub async fn submit(&self, request: &JobRequest) -> Result<Scheduled> {
        self.prepare(request).await?;
        self.schedule(&request.version).await
    }

    pub async fn schedule(&self, version: &str) -> Result<Scheduled> {
        self.scheduler.schedule(version).await
    }

    /// Continue the queue without submitting anything new.
    pub async fn drain(&self) -> Result<usize> {
        self.scheduler.drain().await
    }

    /// Schedule from a detached coordinator container; returns its name.
    pub async fn dispatch(&self, version: &str) -> Result<String> {
        if let Err(e) = self.runner.prune(&format!("{CONTAINERS_LABEL}={SERVER_ROLE}")).await {
            tracing::warn!(error = %e, "Failed to prune old coordinators");
        }
        dispatch::dispatch(&self.runner, &self.config, version).await
    }

    /// The stored job; a running job without a record yet shows as pending.
    pub async fn query(&self, version: &str) -> Result<Job> {
        if let Some(job) = self.store.find(version).await? {
            return Ok(job);
        }
        match self.lock.status().await? {
            LockStatus::Held {
                running: Some(running),
            } if running == version => Ok(Job::new(version)),
            _ => Err(BencherError::JobNotFound(version.to_string())),
        }
    }

    pub async fn query_all(&self) -> Result<Overview> {
        Ok(Overview {
            jobs: self.store.list().await?,
            running: self.lock.status().await?.running().map(str::to_string),
            queue: self.store.queue().await?,
        })
    }

    pub async fn lock_status(&self) -> Result<LockStatus> {
        self.lock.status().await
    }

    /// Clear a lock left behind by a crashed invocation.
    pub async fn unlock(&self) -> Result<()> {
        self.lock.force_release().await
    }

    /// Remove jobs from the queue and the store, and their containers.
    ///
    /// The running job's container is only removed with `force`, which also
    /// stops it. A container the engine refuses to remove is reported in
    /// [`Removed::failed`] and the remaining versions are still processed.
    pub async fn remove(&self, versions: &[String], force: bool) -> Result<Removed> {
        let dequeued = self.store.dequeue(versions).await?;
        let deleted = self.store.delete(versions).await?;
        let running = self.lock.status().await?.running().map(str::to_string);

        let mut stopped = None;
        let mut failed = Vec::new();
        for version in versions {
            let is_running = running.as_deref() == Some(version.as_str());
            if is_running && !force {
                tracing::warn!(version = %version, "Job is running, leaving its container (use force)");
                continue;
            }
            if is_running {
                tracing::info!(version = %version, "Stopping running job");
            }
            if let Err(e) = self.runner.remove(version, is_running).await {
                tracing::error!(version = %version, error = %e, "Failed to remove job container");
                failed.push(version.clone());
                continue;
            }
            if is_running {
                stopped = Some(version.clone());
            }
            remove_dir_if_exists(&self.config.version_dir(version)).await?;
        }

        Ok(Removed {
            dequeued,
            deleted,
            stopped,
            failed,
        })
    }

    /// Remove every job. With `force` the running job is stopped too.
    pub async fn remove_all(&self, force: bool) -> Result<Removed> {
        let mut versions: Vec<String> = self
            .store
            .list()
            .await?
            .into_iter()
            .map(|j| j.version)
            .collect();
        for queued in self.store.queue().await? {
            if !versions.contains(&queued) {
                versions.push(queued);
            }
        }
        if force {
            if let Some(running) = self.lock.status().await?.running() {
                if !versions.iter().any(|v| v == running) {
                    versions.push(running.to_string());
                }
            }
        }

        let removed = self.remove(&versions, force).await?;
        self.store.clear().await?;
        // Orphaned workspaces go too, unless a job may still be using its own.
        if removed.failed.is_empty() && !self.lock.is_held().await? {
            remove_dir_if_exists(&self.config.versions_dir()).await?;
        }
        Ok(removed)
    }
}

/// Workspaces under the versions directory belong to their job.
async fn remove_dir_if_exists(path: &Path) -> Result<()> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
