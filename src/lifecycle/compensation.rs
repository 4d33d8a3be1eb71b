//! Compensating actions for a partially-applied create.

use std::fs;
use std::path::PathBuf;
use tracing::warn;

use super::Warning;
use crate::runtime::Runtime;
use crate::store::MetadataStore;
use crate::workspace::WorkspaceHandle;

/// Undo step registered by a create step that has (or may have) taken effect.
#[derive(Debug)]
pub(crate) enum Compensation {
    DestroyContainer { container: String },
    RemoveVcsWorkspace { handle: WorkspaceHandle, name: String },
    RemoveDir { step: &'static str, path: PathBuf },
    RemoveFile { step: &'static str, path: PathBuf },
    DeleteRecord { name: String },
}

impl Compensation {
    fn step(&self) -> &'static str {
        match self {
            Self::DestroyContainer { .. } => "destroy container",
            Self::RemoveVcsWorkspace { .. } => "remove workspace",
            Self::RemoveDir { step, .. } | Self::RemoveFile { step, .. } => *step,
            Self::DeleteRecord { .. } => "delete record",
        }
    }

    async fn run(&self, runtime: &dyn Runtime, store: &MetadataStore) -> anyhow::Result<()> {
        match self {
            Self::DestroyContainer { container } => runtime.destroy(container).await?,
            Self::RemoveVcsWorkspace { handle, name } => {
                if let WorkspaceHandle::Vcs {
                    backend,
                    source_repo,
                    dest,
                } = handle
                {
                    backend.remove(source_repo, name, dest).await?;
                }
            }
            Self::RemoveDir { path, .. } => {
                if path.exists() {
                    fs::remove_dir_all(path)?;
                }
            }
            Self::RemoveFile { path, .. } => {
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
            Self::DeleteRecord { name } => {
                store.delete(name)?;
            }
        }
        Ok(())
    }
}

/// Registered compensations, undone last-in first-out.
#[derive(Debug, Default)]
pub(crate) struct CompensationStack {
    steps: Vec<Compensation>,
}

impl CompensationStack {
    pub fn push(&mut self, step: Compensation) {
        self.steps.push(step);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Runs every compensation in reverse order. Failures are logged and
    /// returned, never propagated.
    pub async fn unwind(self, runtime: &dyn Runtime, store: &MetadataStore) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for step in self.steps.into_iter().rev() {
            if let Err(e) = step.run(runtime, store).await {
                warn!(step = step.step(), error = %format!("{e:#}"), "Compensation failed");
                warnings.push(Warning::new(step.step(), format!("{e:#}")));
            }
        }
        warnings
    }
}
