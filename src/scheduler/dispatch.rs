use std::collections::BTreeMap;

use crate::config::{BencherConfig, LockBackend, CONTAINERS_LABEL, SERVER_ROLE};
use crate::error::{BencherError, Result};
use crate::runner::names::coordinator_name;
use crate::runner::{ContainerRunner, ContainerSpec, Mount};
use crate::scheduler::job::validate_version;

/// Container that runs `bencher sched <version>` against the host's state.
///
/// The engine socket and the bencher root are bound at their host paths so
/// the coordinator sees the same database, lock and workspaces.
pub fn coordinator_spec(config: &BencherConfig, version: &str) -> ContainerSpec {
    let root = config.root.to_string_lossy().into_owned();
    let socket = config.engine.socket_path.to_string_lossy().into_owned();
    let lock = match config.lock_backend {
        LockBackend::File => "file",
        LockBackend::Lease => "lease",
    };

    ContainerSpec {
        name: coordinator_name(CONTAINERS_LABEL),
        image: config.coordinator.image.clone(),
        command: vec!["sched".to_string(), version.to_string()],
        entrypoint: None,
        working_dir: Some(root.clone()),
        mounts: vec![Mount::bind(&socket, &socket), Mount::bind(&root, &root)],
        env: vec![
            format!("BENCHER_HOME={root}"),
            format!("BENCHER_LOCK={lock}"),
            format!("DOCKER_HOST=unix://{socket}"),
        ],
        labels: BTreeMap::from([(CONTAINERS_LABEL.to_string(), SERVER_ROLE.to_string())]),
    }
}

/// Hand `version` to a detached coordinator container.
///
/// Coordinator names are random; a name conflict draws a new one, up to
/// `coordinator.name_retries` attempts. Returns the coordinator's name.
pub async fn dispatch(
    runner: &ContainerRunner,
    config: &BencherConfig,
    version: &str,
) -> Result<String> {
    validate_version(version)?;
    let attempts = config.coordinator.name_retries.max(1);

    for attempt in 1..=attempts {
        let spec = coordinator_spec(config, version);
        match runner.create(&spec).await {
            Ok(id) => {
                runner.start(&id).await?;
                tracing::info!(version, coordinator = %spec.name, "Coordinator started");
                if config.coordinator.debug {
                    let exit_code = runner.wait(&id).await?;
                    tracing::info!(version, exit_code, "Coordinator exited");
                }
                return Ok(spec.name);
            }
            Err(e) if e.is_conflict() => {
                tracing::warn!(name = %spec.name, attempt, "Coordinator name taken, drawing another");
            }
            Err(e) => return Err(e),
        }
    }

    Err(BencherError::NameRetriesExhausted(attempts))
}
