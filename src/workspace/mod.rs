//! Workspace backends.
//!
//! A sandbox's working directory either is a host directory mounted as-is
//! (`direct`) or an isolated VCS checkout of a source repository (`git`
//! worktree, `jj` workspace). The mode is resolved once per operation into a
//! [`WorkspaceHandle`] so call sites never re-match the mode string.

mod git;
mod jj;

pub(crate) use git::GitWorktreeBackend;
pub(crate) use jj::JjWorkspaceBackend;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use std::process::Output;
use std::sync::Arc;
use tokio::process::Command;

use crate::error::CorralError;

/// How a sandbox's working directory relates to a source repository.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum WorkspaceMode {
    /// Host directory mounted directly
    #[default]
    Direct,
    /// Git worktree on a `corral/<name>` branch
    Git,
    /// Jujutsu workspace named after the sandbox
    Jj,
}

impl WorkspaceMode {
    /// Whether tearing the sandbox down must unwind VCS state.
    pub fn requires_vcs(self) -> bool {
        !matches!(self, Self::Direct)
    }
}

impl std::fmt::Display for WorkspaceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Git => write!(f, "git"),
            Self::Jj => write!(f, "jj"),
        }
    }
}

impl std::str::FromStr for WorkspaceMode {
    type Err = anyhow::Error;

    /// An empty string is `direct`, matching records written before the
    /// field existed.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "" | "direct" => Ok(Self::Direct),
            "git" => Ok(Self::Git),
            "jj" => Ok(Self::Jj),
            _ => bail!("Unknown workspace mode: '{s}'. Supported: direct, git, jj"),
        }
    }
}

impl<'de> Deserialize<'de> for WorkspaceMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        raw.as_deref()
            .unwrap_or_default()
            .parse()
            .map_err(serde::de::Error::custom)
    }
}

/// Version-control backend that materializes isolated workspaces.
#[async_trait]
pub(crate) trait WorkspaceBackend: Send + Sync {
    /// Backend name for display.
    fn name(&self) -> &'static str;

    /// Whether `repo` is a repository this backend can work with.
    async fn is_repo(&self, repo: &Path) -> bool;

    /// Whether a workspace called `name` already exists in `repo`.
    async fn exists(&self, repo: &Path, name: &str) -> Result<bool>;

    /// Materializes workspace `name` of `repo` at `dest`.
    async fn create(&self, repo: &Path, name: &str, dest: &Path) -> Result<()>;

    /// Unwinds workspace `name` of `repo` and removes `dest`.
    async fn remove(&self, repo: &Path, name: &str, dest: &Path) -> Result<()>;
}

/// The backends available for each VCS workspace mode.
#[derive(Clone)]
pub(crate) struct WorkspaceBackends {
    git: Arc<dyn WorkspaceBackend>,
    jj: Arc<dyn WorkspaceBackend>,
}

impl WorkspaceBackends {
    pub fn new(git: Arc<dyn WorkspaceBackend>, jj: Arc<dyn WorkspaceBackend>) -> Self {
        Self { git, jj }
    }

    /// Backends that shell out to the installed `git` and `jj`.
    pub fn system() -> Self {
        Self::new(Arc::new(GitWorktreeBackend), Arc::new(JjWorkspaceBackend))
    }

    fn backend(&self, mode: WorkspaceMode) -> Option<Arc<dyn WorkspaceBackend>> {
        match mode {
            WorkspaceMode::Direct => None,
            WorkspaceMode::Git => Some(Arc::clone(&self.git)),
            WorkspaceMode::Jj => Some(Arc::clone(&self.jj)),
        }
    }

    /// Resolves a mode into a concrete handle.
    ///
    /// VCS modes need the source repository; its absence means the caller
    /// supplied (or persisted) an inconsistent request.
    pub fn resolve(
        &self,
        mode: WorkspaceMode,
        source_repo: Option<&Path>,
        workspace: &Path,
    ) -> Result<WorkspaceHandle, CorralError> {
        match self.backend(mode) {
            None => Ok(WorkspaceHandle::Direct {
                path: workspace.to_path_buf(),
            }),
            Some(backend) => {
                let source_repo = source_repo.ok_or_else(|| {
                    CorralError::validation(format!(
                        "workspace mode '{mode}' requires a source repository"
                    ))
                })?;
                Ok(WorkspaceHandle::Vcs {
                    backend,
                    source_repo: source_repo.to_path_buf(),
                    dest: workspace.to_path_buf(),
                })
            }
        }
    }
}

/// A workspace mode bound to the backend that implements it.
#[derive(Clone)]
pub(crate) enum WorkspaceHandle {
    Direct {
        path: PathBuf,
    },
    Vcs {
        backend: Arc<dyn WorkspaceBackend>,
        source_repo: PathBuf,
        dest: PathBuf,
    },
}

impl std::fmt::Debug for WorkspaceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct { path } => f.debug_struct("Direct").field("path", path).finish(),
            Self::Vcs {
                backend,
                source_repo,
                dest,
            } => f
                .debug_struct("Vcs")
                .field("backend", &backend.name())
                .field("source_repo", source_repo)
                .field("dest", dest)
                .finish(),
        }
    }
}

impl WorkspaceHandle {
    /// Directory mounted into the container.
    pub fn path(&self) -> &Path {
        match self {
            Self::Direct { path } => path,
            Self::Vcs { dest, .. } => dest,
        }
    }
}

/// Runs a VCS command in `dir`, failing with its stderr on a non-zero exit.
pub(crate) async fn run_tool(program: &str, dir: &Path, args: &[&str]) -> Result<Output> {
    let output = Command::new(program)
        .current_dir(dir)
        .args(args)
        .output()
        .await
        .with_context(|| format!("Failed to run {program} {}", args.join(" ")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("{program} {} failed: {}", args.join(" "), stderr.trim());
    }
    Ok(output)
}
