//! Container lifecycle for benchmark jobs.
//!
//! # Components
//!
//! - [`ContainerEngine`]: create/start/wait/logs/remove against an engine
//! - [`DockerEngine`]: the Docker Engine API over its unix socket
//! - [`ContainerRunner`]: engine calls with call-site context and logging,
//!   plus log collection through [`demux`]
//!
//! # Lifecycle
//!
//! 1. `create` at submission; the container is named after the job
//! 2. `start` once the job holds the execution slot
//! 3. `wait` blocks until the container stops, without a timeout
//! 4. `collect_logs` drains and demultiplexes the log stream
//! 5. `remove` after the result is stored

pub mod demux;
pub mod docker;
pub mod names;

pub use demux::LogOutput;
pub use docker::DockerEngine;

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncRead;

use crate::error::{BencherError, Result};

/// Raw multiplexed log stream of one container.
pub type LogStream = Pin<Box<dyn AsyncRead + Send>>;

/// Host path bound into the sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Mount {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

impl Mount {
    pub fn bind(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }
}

/// Everything the engine needs to create a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    /// `Some(vec![""])` clears the image entrypoint.
    pub entrypoint: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub mounts: Vec<Mount>,
    pub env: Vec<String>,
    pub labels: BTreeMap<String, String>,
}

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Create a container; returns the engine's id for it.
    async fn create(&self, spec: &ContainerSpec) -> Result<String>;

    async fn start(&self, handle: &str) -> Result<()>;

    /// Block until the container is no longer running; returns its exit code.
    async fn wait(&self, handle: &str) -> Result<i64>;

    /// Follow the combined stdout/stderr stream until the container is done.
    async fn logs(&self, handle: &str) -> Result<LogStream>;

    async fn remove(&self, handle: &str, force: bool) -> Result<()>;

    /// Remove stopped containers carrying `label` (`key=value`).
    async fn prune(&self, label: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct ContainerRunner {
    engine: Arc<dyn ContainerEngine>,
}

impl ContainerRunner {
    pub fn new(engine: Arc<dyn ContainerEngine>) -> Self {
        Self { engine }
    }

    /// Create a job container. A taken name means the job was already submitted.
    pub async fn create_job(&self, spec: &ContainerSpec) -> Result<String> {
        tracing::info!(name = %spec.name, image = %spec.image, "Creating job container");
        match self.engine.create(spec).await {
            Ok(id) => Ok(id),
            Err(e) if e.is_conflict() => Err(BencherError::DuplicateJob(spec.name.clone())),
            Err(e) => Err(e),
        }
    }

    /// Create without mapping conflicts, for callers that retry under new names.
    pub async fn create(&self, spec: &ContainerSpec) -> Result<String> {
        self.engine.create(spec).await
    }

    pub async fn start(&self, handle: &str) -> Result<()> {
        tracing::debug!(handle, "Starting container");
        self.engine.start(handle).await
    }

    pub async fn wait(&self, handle: &str) -> Result<i64> {
        let exit_code = self.engine.wait(handle).await?;
        tracing::debug!(handle, exit_code, "Container stopped");
        Ok(exit_code)
    }

    pub async fn collect_logs(&self, handle: &str) -> Result<LogOutput> {
        let stream = self.engine.logs(handle).await?;
        demux::demux(stream).await
    }

    /// Remove a container; one that is already gone counts as removed.
    pub async fn remove(&self, handle: &str, force: bool) -> Result<()> {
        match self.engine.remove(handle, force).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                tracing::debug!(handle, "Container already removed");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn prune(&self, label: &str) -> Result<()> {
        self.engine.prune(label).await
    }
}
