//! Reconciliation of the three state sources.
//!
//! Sandbox names are gathered independently from sidecar filenames on disk,
//! from the runtime's container list and from loadable records. Two orphan
//! sets fall out of the diff:
//!
//! - orphaned on disk: files exist but no container does (crashed create, or
//!   a container reaped outside corral)
//! - orphaned containers: a container exists with no valid record (crashed
//!   destroy)
//!
//! A dry run only reports. A forced run repairs disk orphans first, then
//! destroys orphaned containers, after which a second run finds nothing.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use crate::audit::AuditKind;
use crate::context::AppContext;
use crate::error::CorralError;
use crate::lifecycle::{self, DestroyOptions, Outcome, Warning, Warnings};
use crate::names::is_valid_name;
use crate::runtime::{ContainerInfo, Runtime};
use crate::store::SandboxRecord;

/// What a GC pass found and, when forced, removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub(crate) struct GcReport {
    /// Names inferred from sidecar files.
    pub disk: BTreeSet<String>,
    /// Sandbox name to container name for every managed container.
    pub containers: BTreeMap<String, String>,
    /// Names with a valid record.
    pub records: BTreeSet<String>,
    /// Record files that exist but do not load.
    pub invalid_records: BTreeSet<String>,
    pub orphaned_on_disk: BTreeSet<String>,
    /// Orphaned sandbox names, mapped to the container to destroy.
    pub orphaned_containers: BTreeMap<String, String>,
    /// Whether the orphans were acted on.
    pub forced: bool,
}

impl GcReport {
    pub fn is_clean(&self) -> bool {
        self.orphaned_on_disk.is_empty() && self.orphaned_containers.is_empty()
    }
}

/// Runs one reconciliation pass; repairs orphans when `force` is set.
pub(crate) async fn run(ctx: &AppContext, force: bool) -> Result<Outcome<GcReport>, CorralError> {
    let runtime = ctx.runtime().await?;
    let mut report = scan(ctx, runtime.as_ref()).await?;

    debug!(
        disk = report.disk.len(),
        containers = report.containers.len(),
        records = report.records.len(),
        invalid = report.invalid_records.len(),
        "Scanned state sources"
    );

    let mut warnings = Warnings::default();
    if force {
        report.forced = true;
        for name in &report.orphaned_on_disk {
            warnings.extend(repair_disk_orphan(ctx, name, report.records.contains(name)).await);
            ctx.audit.log_event(AuditKind::GcRemove, name, "disk");
        }
        for (name, container) in &report.orphaned_containers {
            warnings.check("destroy orphaned container", runtime.destroy(container).await);
            // Sidecars of an unloadable record would otherwise surface as a
            // disk orphan on the next pass.
            if report.disk.contains(name) {
                warnings.extend(lifecycle::purge_artifacts(ctx, name));
            }
            ctx.audit.log_event(AuditKind::GcRemove, name, container);
        }
    }

    info!(
        event = "gc_sweep",
        forced = force,
        orphaned_on_disk = report.orphaned_on_disk.len(),
        orphaned_containers = report.orphaned_containers.len(),
    );
    Ok(Outcome::new(report, warnings.into_vec()))
}

async fn scan(ctx: &AppContext, runtime: &dyn Runtime) -> Result<GcReport, CorralError> {
    let disk = ctx
        .layout
        .scan_disk_names()
        .map_err(|e| CorralError::backend("scan state dir", e))?;
    let listing = ctx
        .store
        .list()
        .map_err(|e| CorralError::backend("scan records", e))?;
    let listed = runtime
        .list()
        .await
        .map_err(|e| CorralError::backend("list containers", e))?;

    let containers = container_names(ctx, runtime, &listing.records, listed);
    let records = listing.names();
    let invalid_records = listing.invalid.into_iter().map(|(name, _)| name).collect();

    let orphaned_on_disk = disk
        .iter()
        .filter(|name| !containers.contains_key(*name))
        .cloned()
        .collect();
    let orphaned_containers = containers
        .iter()
        .filter(|(name, _)| !records.contains(*name))
        .map(|(name, container)| (name.clone(), container.clone()))
        .collect();

    Ok(GcReport {
        disk,
        containers,
        records,
        invalid_records,
        orphaned_on_disk,
        orphaned_containers,
        forced: false,
    })
}

/// Keys each container by the sandbox it belongs to.
///
/// The backend's sandbox label wins. Unlabelled containers are matched against
/// the name each record resolves to, and fall back to their own name.
fn container_names(
    ctx: &AppContext,
    runtime: &dyn Runtime,
    records: &[SandboxRecord],
    listed: Vec<ContainerInfo>,
) -> BTreeMap<String, String> {
    let by_container: BTreeMap<String, &str> = records
        .iter()
        .map(|r| (ctx.container_name(runtime, r), r.name.as_str()))
        .collect();

    listed
        .into_iter()
        .map(|info| {
            let sandbox = info
                .sandbox
                .filter(|label| is_valid_name(label))
                .or_else(|| by_container.get(&info.name).map(ToString::to_string))
                .unwrap_or_else(|| info.name.clone());
            (sandbox, info.name)
        })
        .collect()
}

/// Full destroy when the record still loads, raw file removal otherwise.
async fn repair_disk_orphan(ctx: &AppContext, name: &str, has_record: bool) -> Vec<Warning> {
    if !has_record {
        return lifecycle::purge_artifacts(ctx, name);
    }
    match lifecycle::destroy(ctx, name, DestroyOptions::default()).await {
        Ok(outcome) => outcome.warnings,
        Err(e) => vec![Warning::new("destroy", e.to_string())],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::testing::{TestContext, TestContextBuilder};
    use crate::lifecycle::CreateRequest;
    use crate::runtime::fake::FakeOp;
    use crate::workspace::WorkspaceMode;
    use std::fs;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(ToString::to_string).collect()
    }

    async fn sandbox(t: &TestContext, name: &str) {
        let request = CreateRequest::new(name, WorkspaceMode::Direct, Some(t.project_dir()));
        lifecycle::create(&t.ctx, request).await.unwrap();
    }

    /// disk {a, b, c}, containers {b, c, d}, records {b, c}.
    async fn scenario() -> TestContext {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "b").await;
        sandbox(&t, "c").await;
        fs::write(t.ctx.layout.config_file("a"), "# left by a crashed create\n").unwrap();
        fs::write(t.ctx.layout.docs_file("a"), "# docs\n").unwrap();
        t.runtime.insert_container("d", true);
        t
    }

    #[tokio::test]
    async fn test_classification() {
        let t = scenario().await;
        let outcome = run(&t.ctx, false).await.unwrap();
        let report = outcome.value;

        assert_eq!(report.disk, set(&["a", "b", "c"]));
        assert_eq!(report.containers.keys().cloned().collect::<BTreeSet<_>>(), set(&["b", "c", "d"]));
        assert_eq!(report.records, set(&["b", "c"]));
        assert_eq!(report.orphaned_on_disk, set(&["a"]));
        assert_eq!(
            report.orphaned_containers,
            BTreeMap::from([("d".to_string(), "d".to_string())])
        );
        assert!(!report.forced);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_dry_run_changes_nothing() {
        let t = scenario().await;
        run(&t.ctx, false).await.unwrap();
        assert_eq!(t.ctx.layout.scan_disk_names().unwrap(), set(&["a", "b", "c"]));
        assert_eq!(t.runtime.container_names(), set(&["b", "c", "d"]));
    }

    #[tokio::test]
    async fn test_force_repairs_and_is_idempotent() {
        let t = scenario().await;
        let outcome = run(&t.ctx, true).await.unwrap();
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert!(outcome.value.forced);

        assert_eq!(t.ctx.layout.scan_disk_names().unwrap(), set(&["b", "c"]));
        assert_eq!(t.runtime.container_names(), set(&["b", "c"]));

        let second = run(&t.ctx, false).await.unwrap().value;
        assert!(second.is_clean(), "{second:?}");
    }

    #[tokio::test]
    async fn test_reaped_container_is_fully_destroyed() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha").await;
        t.runtime.destroy("alpha").await.unwrap();

        let report = run(&t.ctx, false).await.unwrap().value;
        assert_eq!(report.orphaned_on_disk, set(&["alpha"]));
        assert!(report.orphaned_containers.is_empty());

        run(&t.ctx, true).await.unwrap();
        assert!(!t.ctx.store.exists("alpha"));
        assert!(t.ctx.layout.scan_disk_names().unwrap().is_empty());
        assert!(t
            .audit
            .events()
            .contains(&(AuditKind::Destroy, "alpha".to_string())));
    }

    #[tokio::test]
    async fn test_corrupt_record_is_purged_and_its_container_destroyed() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha").await;
        fs::write(t.ctx.layout.record_file("alpha"), "{ not json").unwrap();

        let report = run(&t.ctx, false).await.unwrap().value;
        assert_eq!(report.invalid_records, set(&["alpha"]));
        // Container still live: not a disk orphan, but unowned by any record.
        assert!(report.orphaned_on_disk.is_empty());
        assert!(report.orphaned_containers.contains_key("alpha"));

        let outcome = run(&t.ctx, true).await.unwrap();
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert!(!t.runtime.has_container("alpha"));
        assert!(t.ctx.layout.scan_disk_names().unwrap().is_empty());

        let second = run(&t.ctx, false).await.unwrap().value;
        assert!(second.is_clean(), "{second:?}");
        assert!(second.invalid_records.is_empty());
    }

    #[tokio::test]
    async fn test_stray_container_removal_leaves_other_sandboxes() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha").await;
        t.runtime.insert_container("stray", true);

        run(&t.ctx, true).await.unwrap();
        assert!(!t.runtime.has_container("stray"));
        assert!(t.ctx.store.exists("alpha"));
        assert!(run(&t.ctx, false).await.unwrap().value.is_clean());
    }

    #[tokio::test]
    async fn test_unlabelled_container_matched_by_resolved_name() {
        let t = TestContextBuilder::new().build();
        sandbox(&t, "alpha").await;
        t.runtime.destroy("alpha").await.unwrap();
        t.runtime.insert_labelled("alpha", None, true);

        let report = run(&t.ctx, false).await.unwrap().value;
        assert!(report.is_clean(), "{report:?}");
    }

    #[tokio::test]
    async fn test_untrusted_file_names_are_ignored() {
        let t = TestContextBuilder::new().build();
        fs::write(t.ctx.layout.records_dir().join("..evil.json"), "{}").unwrap();
        fs::write(t.ctx.layout.configs_dir().join("a b.toml"), "").unwrap();

        let report = run(&t.ctx, false).await.unwrap().value;
        assert!(report.disk.is_empty());
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_container_destroy_failure_is_a_warning() {
        let t = scenario().await;
        t.runtime.fail_on(FakeOp::Destroy);

        let outcome = run(&t.ctx, true).await.unwrap();
        assert!(outcome
            .warnings
            .iter()
            .any(|w| w.step == "destroy orphaned container"));
        // Disk orphan `a` had no record, so it was purged without the runtime.
        assert_eq!(t.ctx.layout.scan_disk_names().unwrap(), set(&["b", "c"]));
    }

    #[tokio::test]
    async fn test_list_failure_is_backend_error() {
        let t = TestContextBuilder::new().build();
        t.runtime.fail_on(FakeOp::List);
        let err = run(&t.ctx, false).await.unwrap_err();
        assert!(matches!(err, CorralError::Backend { ref op, .. } if op == "list containers"));
    }
}
