//! The create transaction.
//!
//! Every check that can reject the request runs before the slot is
//! allocated. From the workspace step on, each step registers its
//! compensation *before* acting, so a step that fails halfway is still
//! undone.

use chrono::Utc;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use super::compensation::{Compensation, CompensationStack};
use super::{post_create, Outcome, Warnings};
use crate::allocator;
use crate::audit::AuditKind;
use crate::config::Template;
use crate::context::AppContext;
use crate::error::CorralError;
use crate::generator::{ContainerSpec, SandboxInputs};
use crate::names::validate_name;
use crate::runtime::{ContainerStatus, CreateOptions, Runtime};
use crate::secrets;
use crate::store::{write_atomic, SandboxRecord};
use crate::workspace::{WorkspaceHandle, WorkspaceMode};

/// What the caller asked for.
#[derive(Debug, Clone)]
pub(crate) struct CreateRequest {
    pub name: String,
    /// Template name; the configured default when `None`.
    pub template: Option<String>,
    pub mode: WorkspaceMode,
    /// Directory to mount (direct mode) or source repository (VCS modes).
    /// Direct mode without a path gets an empty managed directory.
    pub path: Option<PathBuf>,
}

impl CreateRequest {
    pub fn new(name: impl Into<String>, mode: WorkspaceMode, path: Option<PathBuf>) -> Self {
        Self {
            name: name.into(),
            template: None,
            mode,
            path,
        }
    }
}

/// A request that passed validation.
struct Plan {
    name: String,
    template_name: String,
    template: Template,
    mode: WorkspaceMode,
    handle: WorkspaceHandle,
    /// Direct mode without a source path: the workspace dir is ours to create.
    managed_dir: bool,
    runtime: Arc<dyn Runtime>,
    container: String,
}

/// Creates a sandbox, rolling back every applied step on failure.
///
/// The error returned is always the one from the step that failed; any
/// compensation failures are only logged.
pub(crate) async fn create(
    ctx: &AppContext,
    request: CreateRequest,
) -> Result<Outcome<SandboxRecord>, CorralError> {
    let plan = validate(ctx, &request).await?;

    let in_use = ctx
        .store
        .used_slots()
        .map_err(|e| CorralError::backend("scan records", e))?;
    let slot = allocator::allocate(ctx.config.network.slot_range(), &in_use)?;
    debug!(sandbox = %plan.name, slot, "Allocated network slot");

    let mut stack = CompensationStack::default();
    let record = match apply(ctx, &plan, slot, &mut stack).await {
        Ok(record) => record,
        Err(e) => {
            let leftovers = stack.unwind(plan.runtime.as_ref(), &ctx.store).await;
            tracing::warn!(
                event = "sandbox_create_failed",
                sandbox = %plan.name,
                error = %e,
                compensation_failures = leftovers.len(),
                "Create failed, rolled back"
            );
            ctx.audit
                .log_event(AuditKind::CreateFailed, &plan.name, &e.to_string());
            return Err(e);
        }
    };

    let mut warnings = Warnings::default();
    post_create(ctx, plan.runtime.as_ref(), &record, &plan.container, &mut warnings).await;

    info!(
        event = "sandbox_create",
        sandbox = %record.name,
        container = %plan.container,
        slot,
        template = %record.template,
        mode = %record.workspace_mode,
    );
    ctx.audit.log_event(
        AuditKind::Create,
        &record.name,
        &format!("template={} slot={slot}", record.template),
    );
    Ok(Outcome::new(record, warnings.into_vec()))
}

/// Rejects bad requests without touching anything.
async fn validate(ctx: &AppContext, request: &CreateRequest) -> Result<Plan, CorralError> {
    let name = request.name.as_str();
    validate_name(name)?;

    let template_name = request
        .template
        .clone()
        .unwrap_or_else(|| ctx.config.default_template.clone());
    let template = ctx.config.template(&template_name).ok_or_else(|| {
        CorralError::validation(format!(
            "unknown template '{template_name}' (available: {})",
            ctx.config.template_names().join(", ")
        ))
    })?;

    if ctx.store.exists(name) {
        return Err(CorralError::validation(format!(
            "sandbox '{name}' already exists"
        )));
    }

    let source = match &request.path {
        Some(path) => Some(fs::canonicalize(path).map_err(|e| {
            CorralError::validation(format!("path {}: {e}", path.display()))
        })?),
        None => None,
    };

    let (workspace, managed_dir) = match (request.mode, &source) {
        (WorkspaceMode::Direct, Some(path)) => {
            if !path.is_dir() {
                return Err(CorralError::validation(format!(
                    "{} is not a directory",
                    path.display()
                )));
            }
            (path.clone(), false)
        }
        (WorkspaceMode::Direct, None) => (ctx.layout.workspace_dir(name), true),
        (mode, None) => {
            return Err(CorralError::validation(format!(
                "workspace mode '{mode}' needs a source repository path"
            )));
        }
        (_, Some(_)) => (ctx.layout.workspace_dir(name), false),
    };

    let handle = ctx
        .workspaces
        .resolve(request.mode, source.as_deref(), &workspace)?;
    if let WorkspaceHandle::Vcs {
        backend,
        source_repo,
        dest,
    } = &handle
    {
        if !backend.is_repo(source_repo).await {
            return Err(CorralError::validation(format!(
                "{} is not a {} repository",
                source_repo.display(),
                request.mode
            )));
        }
        let exists = backend
            .exists(source_repo, name)
            .await
            .map_err(|e| CorralError::backend("check workspace", e))?;
        if exists || dest.exists() {
            return Err(CorralError::validation(format!(
                "{} workspace '{name}' already exists",
                request.mode
            )));
        }
    }

    let runtime = ctx.runtime().await?;
    let container = runtime
        .kind()
        .container_name(&ctx.config.runtime.container_prefix, name);
    let existing = runtime
        .status(&container)
        .await
        .map_err(|e| CorralError::backend("check container", e))?;
    if existing.status != ContainerStatus::NotFound {
        return Err(CorralError::validation(format!(
            "container '{container}' already exists; run `corral gc` to inspect orphans"
        )));
    }

    Ok(Plan {
        name: name.to_string(),
        template_name,
        template,
        mode: request.mode,
        handle,
        managed_dir,
        runtime,
        container,
    })
}

/// Runs the side-effecting steps, pushing a compensation before each one.
async fn apply(
    ctx: &AppContext,
    plan: &Plan,
    slot: u8,
    stack: &mut CompensationStack,
) -> Result<SandboxRecord, CorralError> {
    let name = plan.name.as_str();

    match &plan.handle {
        WorkspaceHandle::Vcs {
            backend,
            source_repo,
            dest,
        } => {
            stack.push(Compensation::RemoveVcsWorkspace {
                handle: plan.handle.clone(),
                name: name.to_string(),
            });
            backend
                .create(source_repo, name, dest)
                .await
                .map_err(|e| CorralError::backend("create workspace", e))?;
        }
        WorkspaceHandle::Direct { path } if plan.managed_dir => {
            if !path.exists() {
                stack.push(Compensation::RemoveDir {
                    step: "remove workspace",
                    path: path.clone(),
                });
            }
            fs::create_dir_all(path).map_err(|e| CorralError::backend("create workspace", e))?;
        }
        WorkspaceHandle::Direct { .. } => {}
    }

    let secrets_dir = ctx.layout.secrets_dir(name);
    let has_secrets = !plan.template.secrets.is_empty();
    if has_secrets {
        stack.push(Compensation::RemoveDir {
            step: "remove secrets",
            path: secrets_dir.clone(),
        });
        let written = secrets::prepare(&secrets_dir, &plan.template.secrets, ctx.secret_lookup)
            .map_err(|e| CorralError::backend("write secrets", e))?;
        debug!(sandbox = %name, count = written.len(), "Prepared secrets");
    }

    let inputs = SandboxInputs {
        name,
        template_name: &plan.template_name,
        template: &plan.template,
        workspace: plan.handle.path(),
        slot,
        subnet_prefix: &ctx.config.network.subnet_prefix,
        secrets_dir: has_secrets.then_some(secrets_dir.as_path()),
        overlay: None,
    };
    let text = ctx
        .generator
        .generate(&inputs)
        .map_err(|e| CorralError::backend("generate config", e))?;
    let config_file = ctx.layout.config_file(name);
    stack.push(Compensation::RemoveFile {
        step: "remove config",
        path: config_file.clone(),
    });
    write_atomic(&config_file, text.as_bytes())
        .map_err(|e| CorralError::backend("write config", e))?;
    let spec = ContainerSpec::load(&config_file)?;

    stack.push(Compensation::DestroyContainer {
        container: plan.container.clone(),
    });
    plan.runtime
        .create(&CreateOptions {
            container: plan.container.clone(),
            sandbox: name.to_string(),
            spec,
            start: true,
        })
        .await
        .map_err(|e| CorralError::backend("create container", e))?;

    let record = SandboxRecord {
        name: name.to_string(),
        template: plan.template_name.clone(),
        workspace: plan.handle.path().to_path_buf(),
        network_slot: slot,
        created_at: Utc::now(),
        workspace_mode: plan.mode,
        source_repo: match &plan.handle {
            WorkspaceHandle::Vcs { source_repo, .. } => Some(source_repo.clone()),
            WorkspaceHandle::Direct { .. } => None,
        },
        resolved_container_name: Some(plan.container.clone()),
        runtime_backend: Some(plan.runtime.kind().to_string()),
    };
    stack.push(Compensation::DeleteRecord {
        name: name.to_string(),
    });
    ctx.store
        .save(&record)
        .map_err(|e| CorralError::backend("persist record", e))?;

    Ok(record)
}
