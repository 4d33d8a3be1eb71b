//! Explicit application context.
//!
//! Everything an operation needs is reached through an [`AppContext`] built
//! once per invocation and passed down. The runtime is connected lazily so
//! commands that fail validation or lookups never touch the backend.

use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::audit::{AuditSink, JsonlAuditSink};
use crate::config::{BackendChoice, Config};
use crate::error::CorralError;
use crate::generator::{ConfigGenerator, TomlConfigGenerator};
use crate::health::{HealthChecker, HttpHealthChecker};
use crate::layout::StateLayout;
use crate::runtime::{DockerRuntime, NixosContainerRuntime, Runtime, RuntimeError};
use crate::secrets;
use crate::store::{MetadataStore, SandboxRecord};
use crate::workspace::WorkspaceBackends;

/// Looks up a host environment variable for secret material.
pub(crate) type SecretLookup = fn(&str) -> Option<String>;

pub(crate) struct AppContext {
    pub config: Config,
    pub layout: StateLayout,
    pub store: MetadataStore,
    pub workspaces: WorkspaceBackends,
    pub generator: Arc<dyn ConfigGenerator>,
    pub audit: Arc<dyn AuditSink>,
    pub secret_lookup: SecretLookup,
    runtime: OnceCell<Arc<dyn Runtime>>,
    health: OnceCell<Arc<dyn HealthChecker>>,
}

impl AppContext {
    /// Production wiring for `config`; creates the state directory skeleton.
    pub fn from_config(config: Config) -> Result<Self> {
        let layout = StateLayout::new(config.state_dir()?);
        layout
            .ensure_dirs()
            .with_context(|| format!("Failed to prepare state dir {}", layout.root().display()))?;

        Ok(Self {
            store: MetadataStore::new(layout.clone()),
            audit: Arc::new(JsonlAuditSink::new(layout.audit_log())),
            workspaces: WorkspaceBackends::system(),
            generator: Arc::new(TomlConfigGenerator),
            secret_lookup: secrets::from_env,
            runtime: OnceCell::new(),
            health: OnceCell::new(),
            layout,
            config,
        })
    }

    /// The container runtime, connected on first use.
    pub async fn runtime(&self) -> Result<Arc<dyn Runtime>, CorralError> {
        self.runtime
            .get_or_try_init(|| connect_runtime(self.config.runtime.backend))
            .await
            .map(Arc::clone)
            .map_err(|e| CorralError::backend("connect runtime", e))
    }

    /// The health checker used by the monitor.
    pub async fn health(&self) -> Result<Arc<dyn HealthChecker>, CorralError> {
        let runtime = self.runtime().await?;
        self.health
            .get_or_try_init(|| async move {
                HttpHealthChecker::new(&self.config.monitor, runtime)
                    .map(|checker| Arc::new(checker) as Arc<dyn HealthChecker>)
            })
            .await
            .map(Arc::clone)
            .map_err(|e| CorralError::config(format!("{e:#}")))
    }

    /// Container name for a record, preferring the persisted one.
    pub fn container_name(&self, runtime: &dyn Runtime, record: &SandboxRecord) -> String {
        record.resolved_container_name.clone().unwrap_or_else(|| {
            runtime
                .kind()
                .container_name(&self.config.runtime.container_prefix, &record.name)
        })
    }
}

async fn connect_runtime(choice: BackendChoice) -> Result<Arc<dyn Runtime>, RuntimeError> {
    match choice {
        BackendChoice::Docker => Ok(Arc::new(DockerRuntime::connect().await?)),
        BackendChoice::NixosContainer => Ok(Arc::new(NixosContainerRuntime::detect().await?)),
        BackendChoice::Auto => match DockerRuntime::connect().await {
            Ok(docker) => Ok(Arc::new(docker)),
            Err(docker_err) if docker_err.is_unavailable() => {
                debug!(error = %docker_err, "Docker unavailable, trying nixos-container");
                match NixosContainerRuntime::detect().await {
                    Ok(nixos) => Ok(Arc::new(nixos)),
                    Err(nixos_err) => Err(RuntimeError::unavailable(format!(
                        "no container backend found (docker: {docker_err}; nixos-container: {nixos_err})"
                    ))),
                }
            }
            Err(e) => Err(e),
        },
    }
}
