use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Label key carried by every container this crate creates.
pub const CONTAINERS_LABEL: &str = "bencher";

/// Label value for job containers.
pub const RUNNER_ROLE: &str = "runner";

/// Label value for coordinator containers.
pub const SERVER_ROLE: &str = "server";

/// Configuration for the Docker sandbox a benchmark job runs in.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    /// Docker image to use for job execution
    pub image: String,
    /// Command used when a submission does not give one
    pub default_command: Vec<String>,
    /// Environment passed to every job container
    pub env: Vec<String>,
    /// Where the job's workspace is mounted inside the container
    pub mount_target: String,
    /// Clear the image entrypoint so the command runs as given
    pub reset_entrypoint: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: "golang:alpine".to_string(),
            default_command: ["go", "test", "-bench=.", "-benchmem"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            env: vec!["CGO_ENABLED=0".to_string()],
            mount_target: "/bencher".to_string(),
            reset_entrypoint: true,
        }
    }
}

/// Where to reach the container engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Unix socket of the Docker daemon
    pub socket_path: PathBuf,
    /// API version prefix, e.g. "v1.41"
    pub api_version: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
            api_version: "v1.41".to_string(),
        }
    }
}

/// The detached container that runs `bencher sched <version>` on behalf of a
/// submitting shell.
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub image: String,
    /// How many fresh random names to try when the engine reports a name conflict
    pub name_retries: u32,
    /// Block until the coordinator exits instead of returning right after start
    pub debug: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            image: "bencher:latest".to_string(),
            name_retries: 8,
            debug: false,
        }
    }
}

/// Which primitive backs the execution lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockBackend {
    /// Exclusive creation of a sentinel file
    #[default]
    File,
    /// Single-row lease table in the job database
    Lease,
}

#[derive(Debug, Clone)]
pub struct BencherConfig {
    /// Host directory holding workspaces and server state
    pub root: PathBuf,
    pub lock_backend: LockBackend,
    pub sandbox: SandboxConfig,
    pub engine: EngineConfig,
    pub coordinator: CoordinatorConfig,
}

impl Default for BencherConfig {
    fn default() -> Self {
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        Self::new(home.join(".bencher"))
    }
}

impl BencherConfig {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            lock_backend: LockBackend::default(),
            sandbox: SandboxConfig::default(),
            engine: EngineConfig::default(),
            coordinator: CoordinatorConfig::default(),
        }
    }

    /// Build from the process environment.
    ///
    /// - `BENCHER_HOME` overrides the root directory (default `$HOME/.bencher`)
    /// - `BENCHER_DEBUG` (any value) makes dispatch wait for the coordinator
    /// - `BENCHER_LOCK=lease` selects the database lease lock
    /// - `DOCKER_HOST=unix://...` overrides the engine socket
    pub fn from_env() -> Self {
        let vars: BTreeMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    pub fn from_vars(vars: &BTreeMap<String, String>) -> Self {
        let mut config = match vars.get("BENCHER_HOME") {
            Some(root) if !root.is_empty() => Self::new(root),
            _ => match vars.get("HOME") {
                Some(home) => Self::new(Path::new(home).join(".bencher")),
                None => Self::default(),
            },
        };

        config.coordinator.debug = vars.get("BENCHER_DEBUG").is_some_and(|v| !v.is_empty());

        if let Some(backend) = vars.get("BENCHER_LOCK") {
            match backend.as_str() {
                "lease" => config.lock_backend = LockBackend::Lease,
                "file" => config.lock_backend = LockBackend::File,
                other => tracing::warn!(backend = other, "Unknown BENCHER_LOCK, using file lock"),
            }
        }

        if let Some(socket) = vars
            .get("DOCKER_HOST")
            .and_then(|host| host.strip_prefix("unix://"))
        {
            config.engine.socket_path = PathBuf::from(socket);
        }

        config
    }

    pub fn with_lock_backend(mut self, backend: LockBackend) -> Self {
        self.lock_backend = backend;
        self
    }

    pub fn with_image(mut self, image: impl Into<String>) -> Self {
        self.sandbox.image = image.into();
        self
    }

    /// Snapshotted workspaces, one directory per version.
    pub fn versions_dir(&self) -> PathBuf {
        self.root.join("versions")
    }

    pub fn version_dir(&self, version: &str) -> PathBuf {
        self.versions_dir().join(version)
    }

    /// Shared scheduler state: database, lock sentinel, run marker.
    pub fn server_dir(&self) -> PathBuf {
        self.root.join("server")
    }

    pub fn db_path(&self) -> PathBuf {
        self.server_dir().join("db")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.server_dir().join("pid")
    }

    pub fn marker_path(&self) -> PathBuf {
        self.server_dir().join("running")
    }
}
