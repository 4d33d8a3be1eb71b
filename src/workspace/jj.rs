//! Jujutsu workspace backend.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;

use super::{run_tool, WorkspaceBackend};

/// Backend driving the installed `jj` binary.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct JjWorkspaceBackend;

/// Workspace names from `jj workspace list` output (`<name>: <change> ...`).
fn parse_workspace_list(output: &str) -> Vec<&str> {
    output
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(name, _)| name.trim())
        .filter(|name| !name.is_empty())
        .collect()
}

#[async_trait]
impl WorkspaceBackend for JjWorkspaceBackend {
    fn name(&self) -> &'static str {
        "jj"
    }

    async fn is_repo(&self, repo: &Path) -> bool {
        repo.join(".jj").is_dir()
    }

    async fn exists(&self, repo: &Path, name: &str) -> Result<bool> {
        let output = run_tool("jj", repo, &["workspace", "list"]).await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(parse_workspace_list(&stdout).contains(&name))
    }

    /// Runs: `jj workspace add --name <name> <dest>`
    async fn create(&self, repo: &Path, name: &str, dest: &Path) -> Result<()> {
        let dest = dest.to_string_lossy();
        run_tool("jj", repo, &["workspace", "add", "--name", name, &dest])
            .await
            .with_context(|| format!("Failed to create jj workspace '{name}'"))?;
        Ok(())
    }

    /// Forgets the workspace, then deletes its directory (jj leaves it).
    async fn remove(&self, repo: &Path, name: &str, dest: &Path) -> Result<()> {
        if self.exists(repo, name).await? {
            run_tool("jj", repo, &["workspace", "forget", name])
                .await
                .with_context(|| format!("Failed to forget jj workspace '{name}'"))?;
        }
        if dest.exists() {
            std::fs::remove_dir_all(dest)
                .with_context(|| format!("Failed to remove {}", dest.display()))?;
        }
        Ok(())
    }
}
