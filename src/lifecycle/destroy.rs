//! The destroy transaction.
//!
//! Only loading the record can fail the operation outright. Every later step
//! is attempted regardless of earlier failures, and the result is judged by
//! the end state: no record and no container.

use anyhow::anyhow;
use std::fs;
use std::time::Duration;
use tracing::info;

use super::{Outcome, Warning, Warnings};
use crate::audit::AuditKind;
use crate::context::AppContext;
use crate::error::CorralError;
use crate::layout::SidecarKind;
use crate::runtime::{self, ContainerStatus};
use crate::secrets;
use crate::store::SandboxRecord;
use crate::workspace::WorkspaceHandle;

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DestroyOptions {
    /// Stop with this timeout before destroying; hard destroy when `None`.
    pub graceful: Option<Duration>,
}

/// Tears down a sandbox and everything it owns.
pub(crate) async fn destroy(
    ctx: &AppContext,
    name: &str,
    options: DestroyOptions,
) -> Result<Outcome<SandboxRecord>, CorralError> {
    let record = ctx.store.load(name)?;
    let mut warnings = Warnings::default();

    let runtime = warnings.check("connect runtime", ctx.runtime().await);
    let container = runtime
        .as_ref()
        .map(|rt| ctx.container_name(rt.as_ref(), &record));

    if let (Some(rt), Some(container)) = (&runtime, &container) {
        if let Some(timeout) = options.graceful {
            if warnings.check("status", rt.is_running(container).await) == Some(true) {
                warnings.check(
                    "stop container",
                    runtime::stop_with_timeout(rt.as_ref(), container, timeout).await,
                );
            }
        }
        warnings.check("destroy container", rt.destroy(container).await);
    }

    let handle = ctx.workspaces.resolve(
        record.workspace_mode,
        record.source_repo.as_deref(),
        &record.workspace,
    );
    match handle {
        Ok(WorkspaceHandle::Vcs {
            backend,
            source_repo,
            dest,
        }) => {
            warnings.check(
                "remove workspace",
                backend
                    .remove(&source_repo, name, &dest)
                    .await
                    .map_err(|e| format!("{e:#}")),
            );
        }
        Ok(WorkspaceHandle::Direct { .. }) => {}
        Err(e) => warnings.push(Warning::new("remove workspace", e.to_string())),
    }

    warnings.extend(purge_artifacts(ctx, name));

    let record_gone = !ctx.layout.record_file(name).exists();
    let container_gone = match (&runtime, &container) {
        (Some(rt), Some(container)) => rt
            .status(container)
            .await
            .is_ok_and(|info| info.status == ContainerStatus::NotFound),
        _ => false,
    };
    let warnings = warnings.into_vec();

    if !(record_gone && container_gone) {
        let detail = warnings
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        tracing::warn!(event = "sandbox_destroy_incomplete", sandbox = %name, %detail);
        return Err(CorralError::backend(
            "destroy",
            anyhow!("sandbox '{name}' was not fully removed: {detail}"),
        ));
    }

    info!(
        event = "sandbox_destroy",
        sandbox = %name,
        warnings = warnings.len(),
    );
    ctx.audit.log_event(AuditKind::Destroy, name, "");
    Ok(Outcome::new(record, warnings))
}

/// Deletes every disk artifact of `name`: the managed workspace directory,
/// secrets and sidecar files, the record last.
///
/// Never touches the runtime or VCS state; used directly by GC when no
/// loadable record is left to drive a full destroy.
pub(crate) fn purge_artifacts(ctx: &AppContext, name: &str) -> Vec<Warning> {
    let mut warnings = Warnings::default();

    let managed = ctx.layout.workspace_dir(name);
    if managed.exists() {
        warnings.check(
            "remove workspace dir",
            fs::remove_dir_all(&managed).map_err(|e| format!("{}: {e}", managed.display())),
        );
    }
    warnings.check(
        "remove secrets",
        secrets::remove(&ctx.layout.secrets_dir(name)).map_err(|e| format!("{e:#}")),
    );

    for (kind, path) in ctx.layout.sidecar_files(name) {
        if !path.exists() {
            continue;
        }
        let step = match kind {
            SidecarKind::Config => "remove config",
            SidecarKind::Docs => "remove docs",
            SidecarKind::Permissions => "remove permissions",
            SidecarKind::Record => "delete record",
        };
        warnings.check(
            step,
            fs::remove_file(&path).map_err(|e| format!("{}: {e}", path.display())),
        );
    }
    warnings.into_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{TestContext, TestContextBuilder};
    use crate::lifecycle::{create, CreateRequest};
    use crate::permissions::PermissionOverlay;
    use crate::runtime::fake::{FakeOp, FakeRuntime, RuntimeCall};
    use crate::runtime::Runtime;
    use crate::workspace::WorkspaceMode;
    use std::sync::atomic::Ordering;

    async fn sandbox(t: &TestContext, name: &str, mode: WorkspaceMode) -> SandboxRecord {
        let request = CreateRequest::new(name, mode, Some(t.project_dir()));
        create(&t.ctx, request).await.unwrap().value
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha", WorkspaceMode::Direct).await;
        PermissionOverlay::default()
            .save(&t.ctx.layout.permissions_file("alpha"))
            .unwrap();
        fs::create_dir_all(t.ctx.layout.secrets_dir("alpha")).unwrap();

        let outcome = destroy(&t.ctx, "alpha", DestroyOptions::default())
            .await
            .unwrap();
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert_eq!(outcome.value.name, "alpha");

        assert!(!t.runtime.has_container("alpha"));
        for (_, path) in t.ctx.layout.sidecar_files("alpha") {
            assert!(!path.exists(), "{} left behind", path.display());
        }
        assert!(!t.ctx.layout.secrets_dir("alpha").exists());
        // The user's project directory is mounted, not owned.
        assert!(t.project_dir().is_dir());
        assert!(t
            .audit
            .events()
            .contains(&(AuditKind::Destroy, "alpha".to_string())));
    }

    #[tokio::test]
    async fn test_destroy_missing_record_is_not_found() {
        let t = TestContextBuilder::new().build();
        let err = destroy(&t.ctx, "ghost", DestroyOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(t.runtime.calls().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_twice_keeps_end_state() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha", WorkspaceMode::Direct).await;

        destroy(&t.ctx, "alpha", DestroyOptions::default()).await.unwrap();
        let containers = t.runtime.container_names();
        let disk = t.ctx.layout.scan_disk_names().unwrap();

        let err = destroy(&t.ctx, "alpha", DestroyOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(t.runtime.container_names(), containers);
        assert_eq!(t.ctx.layout.scan_disk_names().unwrap(), disk);
    }

    #[tokio::test]
    async fn test_destroy_with_container_already_gone() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha", WorkspaceMode::Direct).await;
        t.runtime.destroy("alpha").await.unwrap();

        let outcome = destroy(
            &t.ctx,
            "alpha",
            DestroyOptions {
                graceful: Some(Duration::from_secs(5)),
            },
        )
        .await
        .unwrap();
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert!(!t.ctx.store.exists("alpha"));
    }

    #[tokio::test]
    async fn test_graceful_destroy_uses_capability() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha", WorkspaceMode::Direct).await;
        t.runtime.clear_calls();

        destroy(
            &t.ctx,
            "alpha",
            DestroyOptions {
                graceful: Some(Duration::from_secs(7)),
            },
        )
        .await
        .unwrap();
        let calls = t.runtime.calls();
        let stop_at = calls
            .iter()
            .position(|c| *c == RuntimeCall::StopWithTimeout("alpha".into(), 7))
            .unwrap();
        let destroy_at = calls
            .iter()
            .position(|c| *c == RuntimeCall::Destroy("alpha".into()))
            .unwrap();
        assert!(stop_at < destroy_at);
    }

    #[tokio::test]
    async fn test_graceful_destroy_falls_back_to_stop() {
        let t = TestContextBuilder::new()
            .runtime(FakeRuntime::new().with_graceful_stop(false))
            .build();
        sandbox(&t, "alpha", WorkspaceMode::Direct).await;

        destroy(
            &t.ctx,
            "alpha",
            DestroyOptions {
                graceful: Some(Duration::from_secs(7)),
            },
        )
        .await
        .unwrap();
        let calls = t.runtime.calls();
        assert!(calls.contains(&RuntimeCall::Stop("alpha".into())));
        assert!(!calls
            .iter()
            .any(|c| matches!(c, RuntimeCall::StopWithTimeout(..))));
    }

    #[tokio::test]
    async fn test_destroy_removes_vcs_workspace() {
        let t = TestContextBuilder::new().build();
        let record = sandbox(&t, "alpha", WorkspaceMode::Jj).await;
        assert!(record.workspace.is_dir());

        destroy(&t.ctx, "alpha", DestroyOptions::default()).await.unwrap();
        assert_eq!(t.workspace.removed(), vec!["alpha".to_string()]);
        assert!(!record.workspace.exists());
    }

    #[tokio::test]
    async fn test_workspace_failure_is_a_warning() {
        let t = TestContextBuilder::new().build();
        let record = sandbox(&t, "alpha", WorkspaceMode::Git).await;
        t.workspace.fail_remove.store(true, Ordering::SeqCst);

        let outcome = destroy(&t.ctx, "alpha", DestroyOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].step, "remove workspace");
        // The managed directory is still cleared by the raw purge.
        assert!(!record.workspace.exists());
        assert!(!t.ctx.store.exists("alpha"));
    }

    #[tokio::test]
    async fn test_runtime_failure_fails_destroy_but_cleans_disk() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha", WorkspaceMode::Direct).await;
        t.runtime.fail_on(FakeOp::Destroy);

        let err = destroy(&t.ctx, "alpha", DestroyOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, CorralError::Backend { ref op, .. } if op == "destroy"));
        assert!(err.to_string().contains("destroy container"));
        assert!(!t.ctx.store.exists("alpha"));
        assert!(!t.ctx.layout.config_file("alpha").exists());
        assert!(t.runtime.has_container("alpha"));
    }

    #[tokio::test]
    async fn test_purge_artifacts_without_record() {
        let t = TestContextBuilder::new().build();
        let layout = &t.ctx.layout;
        fs::write(layout.config_file("orphan"), "x").unwrap();
        fs::write(layout.docs_file("orphan"), "x").unwrap();
        fs::create_dir_all(layout.secrets_dir("orphan")).unwrap();
        fs::create_dir_all(layout.workspace_dir("orphan")).unwrap();

        let warnings = purge_artifacts(&t.ctx, "orphan");
        assert!(warnings.is_empty(), "{warnings:?}");
        assert!(layout.scan_disk_names().unwrap().is_empty());
        assert!(!layout.secrets_dir("orphan").exists());
        assert!(!layout.workspace_dir("orphan").exists());
        assert!(t.runtime.calls().is_empty());
    }
}
