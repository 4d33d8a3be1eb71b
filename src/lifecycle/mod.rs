//! Sandbox lifecycle: create, destroy, start, stop, reset, reconfigure.
//!
//! Create is transactional with compensating rollback; destroy is best-effort
//! past the record load. Both report partial failures as [`Warning`]s in the
//! returned [`Outcome`] instead of failing the operation.

mod compensation;
mod create;
mod destroy;
mod ready;

pub(crate) use create::{create, CreateRequest};
pub(crate) use destroy::{destroy, purge_artifacts, DestroyOptions};

use std::fmt;
use std::time::Duration;
use tracing::info;

use crate::audit::AuditKind;
use crate::context::AppContext;
use crate::error::CorralError;
use crate::generator::{render_docs, ContainerSpec, SandboxInputs, DOCS_PATH};
use crate::permissions::PermissionOverlay;
use crate::runtime::{self, ContainerStatus, CreateOptions, Runtime};
use crate::store::{write_atomic, SandboxRecord};
use ready::wait_ready;

/// A step that failed without failing the whole operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Warning {
    pub step: &'static str,
    pub message: String,
}

impl Warning {
    pub fn new(step: &'static str, message: impl Into<String>) -> Self {
        Self {
            step,
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.message)
    }
}

/// Result of an operation plus the warnings it collected.
#[derive(Debug)]
pub(crate) struct Outcome<T> {
    pub value: T,
    pub warnings: Vec<Warning>,
}

impl<T> Outcome<T> {
    pub fn new(value: T, warnings: Vec<Warning>) -> Self {
        Self { value, warnings }
    }
}

/// Collects warnings from best-effort steps.
#[derive(Debug, Default)]
pub(crate) struct Warnings(Vec<Warning>);

impl Warnings {
    /// Records the error of a failed step, if any; returns the success value.
    pub fn check<T, E: fmt::Display>(&mut self, step: &'static str, result: Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!(step, error = %e, "Step failed, continuing");
                self.0.push(Warning::new(step, e.to_string()));
                None
            }
        }
    }

    pub fn push(&mut self, warning: Warning) {
        self.0.push(warning);
    }

    pub fn extend(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        self.0.extend(warnings);
    }

    pub fn into_vec(self) -> Vec<Warning> {
        self.0
    }
}

/// Wraps a runtime failure in the lifecycle error taxonomy.
fn backend(op: &'static str, e: runtime::RuntimeError) -> CorralError {
    CorralError::backend(op, e)
}

/// Starts a sandbox's container. No-op when it is already running.
pub(crate) async fn start(ctx: &AppContext, name: &str) -> Result<SandboxRecord, CorralError> {
    let record = ctx.store.load(name)?;
    let runtime = ctx.runtime().await?;
    let container = ctx.container_name(runtime.as_ref(), &record);

    match runtime.status(&container).await.map_err(|e| backend("status", e))?.status {
        ContainerStatus::NotFound => return Err(CorralError::container_not_found(container)),
        ContainerStatus::Running => return Ok(record),
        ContainerStatus::Stopped => {}
    }
    runtime
        .start(&container)
        .await
        .map_err(|e| backend("start", e))?;

    info!(event = "sandbox_start", sandbox = %name, container = %container);
    ctx.audit.log_event(AuditKind::Start, name, "");
    Ok(record)
}

/// Stops a sandbox's container, gracefully when `timeout` is given.
/// No-op when it is already stopped.
pub(crate) async fn stop(
    ctx: &AppContext,
    name: &str,
    timeout: Option<Duration>,
) -> Result<SandboxRecord, CorralError> {
    let record = ctx.store.load(name)?;
    let runtime = ctx.runtime().await?;
    let container = ctx.container_name(runtime.as_ref(), &record);

    match runtime.status(&container).await.map_err(|e| backend("status", e))?.status {
        ContainerStatus::NotFound => return Err(CorralError::container_not_found(container)),
        ContainerStatus::Stopped => return Ok(record),
        ContainerStatus::Running => {}
    }
    match timeout {
        Some(t) => runtime::stop_with_timeout(runtime.as_ref(), &container, t).await,
        None => runtime.stop(&container).await,
    }
    .map_err(|e| backend("stop", e))?;

    info!(event = "sandbox_stop", sandbox = %name, container = %container);
    ctx.audit.log_event(AuditKind::Stop, name, "");
    Ok(record)
}

/// Recreates the container from the on-disk config without regenerating it.
///
/// Fails with a config error when the config sidecar is gone.
pub(crate) async fn reset(ctx: &AppContext, name: &str) -> Result<Outcome<SandboxRecord>, CorralError> {
    let record = ctx.store.load(name)?;
    let spec = ContainerSpec::load(&ctx.layout.config_file(name))?;
    let runtime = ctx.runtime().await?;
    let container = ctx.container_name(runtime.as_ref(), &record);
    let mut warnings = Warnings::default();

    warnings.check("destroy container", runtime.destroy(&container).await);
    runtime
        .create(&CreateOptions {
            container: container.clone(),
            sandbox: name.to_string(),
            spec,
            start: true,
        })
        .await
        .map_err(|e| backend("create container", e))?;

    post_create(ctx, runtime.as_ref(), &record, &container, &mut warnings).await;

    info!(event = "sandbox_reset", sandbox = %name, container = %container);
    ctx.audit.log_event(AuditKind::Reset, name, "");
    Ok(Outcome::new(record, warnings.into_vec()))
}

/// Replaces the permission overlay and regenerates the config sidecar.
/// Takes effect on the next reset.
pub(crate) async fn reconfigure(
    ctx: &AppContext,
    name: &str,
    overlay: PermissionOverlay,
) -> Result<SandboxRecord, CorralError> {
    let record = ctx.store.load(name)?;
    let template = ctx.config.template(&record.template).ok_or_else(|| {
        CorralError::config(format!(
            "template '{}' of sandbox '{name}' is no longer configured",
            record.template
        ))
    })?;

    overlay
        .save(&ctx.layout.permissions_file(name))
        .map_err(|e| CorralError::backend("write permissions", e))?;

    let secrets_dir = ctx.layout.secrets_dir(name);
    let inputs = SandboxInputs {
        name,
        template_name: &record.template,
        template: &template,
        workspace: &record.workspace,
        slot: record.network_slot,
        subnet_prefix: &ctx.config.network.subnet_prefix,
        secrets_dir: secrets_dir.is_dir().then_some(secrets_dir.as_path()),
        overlay: Some(&overlay),
    };
    let text = ctx
        .generator
        .generate(&inputs)
        .map_err(|e| CorralError::backend("generate config", e))?;
    write_atomic(&ctx.layout.config_file(name), text.as_bytes())
        .map_err(|e| CorralError::backend("write config", e))?;

    info!(event = "sandbox_reconfigure", sandbox = %name, policy = %overlay.network);
    ctx.audit
        .log_event(AuditKind::Reconfigure, name, &overlay.network.to_string());
    Ok(record)
}

/// Best-effort steps after a container exists: wait for readiness, then
/// write and inject the docs.
async fn post_create(
    ctx: &AppContext,
    runtime: &dyn Runtime,
    record: &SandboxRecord,
    container: &str,
    warnings: &mut Warnings,
) {
    let lifecycle = &ctx.config.lifecycle;
    let ready = wait_ready(
        runtime,
        container,
        lifecycle.ready_attempts,
        lifecycle.ready_interval(),
    )
    .await;
    if warnings.check("wait for ready", ready).is_none() {
        return;
    }

    let Some(spec) = warnings.check(
        "load config",
        ContainerSpec::load(&ctx.layout.config_file(&record.name)),
    ) else {
        return;
    };
    let docs = render_docs(&spec, record.workspace_mode);
    warnings.check(
        "write docs",
        write_atomic(&ctx.layout.docs_file(&record.name), docs.as_bytes()).map_err(|e| format!("{e:#}")),
    );
    warnings.check(
        "inject docs",
        runtime.write_file(container, DOCS_PATH, docs.as_bytes()).await,
    );
}
