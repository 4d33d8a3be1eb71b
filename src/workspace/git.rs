//! Git worktree backend.
//!
//! Each sandbox gets a worktree on branch `corral/<name>`. Removing the
//! sandbox removes the worktree but keeps the branch, so commits made inside
//! the sandbox survive teardown; a later sandbox of the same name checks the
//! branch out again.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::process::Command;

use super::{run_tool, WorkspaceBackend};

/// Branch namespace for sandbox worktrees.
const BRANCH_PREFIX: &str = "corral/";

/// Branch a sandbox's worktree is checked out on.
pub(crate) fn branch_name(sandbox: &str) -> String {
    format!("{BRANCH_PREFIX}{sandbox}")
}

/// Backend driving the installed `git` binary.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct GitWorktreeBackend;

#[async_trait]
impl WorkspaceBackend for GitWorktreeBackend {
    fn name(&self) -> &'static str {
        "git"
    }

    async fn is_repo(&self, repo: &Path) -> bool {
        Command::new("git")
            .current_dir(repo)
            .args(["rev-parse", "--git-dir"])
            .output()
            .await
            .is_ok_and(|o| o.status.success())
    }

    /// A sandbox exists while a live worktree has its branch checked out.
    /// The branch alone outlives teardown and does not count.
    async fn exists(&self, repo: &Path, name: &str) -> Result<bool> {
        let output = run_tool("git", repo, &["worktree", "list", "--porcelain"])
            .await
            .context("Failed to list git worktrees")?;
        let listing = String::from_utf8_lossy(&output.stdout);
        Ok(worktree_on_branch(&listing, &branch_name(name)))
    }

    /// Runs: `git worktree add <dest> -b corral/<name>`, or without `-b`
    /// when the branch is left over from an earlier sandbox of that name.
    async fn create(&self, repo: &Path, name: &str, dest: &Path) -> Result<()> {
        let branch = branch_name(name);
        let dest = dest.to_string_lossy();
        run_tool("git", repo, &["worktree", "prune"]).await?;
        let args: Vec<&str> = if branch_exists(repo, &branch).await? {
            vec!["worktree", "add", &*dest, branch.as_str()]
        } else {
            vec!["worktree", "add", &*dest, "-b", branch.as_str()]
        };
        run_tool("git", repo, &args)
            .await
            .with_context(|| format!("Failed to create worktree for branch '{branch}'"))?;
        Ok(())
    }

    /// Runs: `git worktree remove <dest> --force`, or `git worktree prune`
    /// when the directory is already gone.
    async fn remove(&self, repo: &Path, name: &str, dest: &Path) -> Result<()> {
        if !dest.exists() {
            run_tool("git", repo, &["worktree", "prune"]).await?;
            return Ok(());
        }
        let dest = dest.to_string_lossy();
        run_tool("git", repo, &["worktree", "remove", &dest, "--force"])
            .await
            .with_context(|| format!("Failed to remove worktree for branch '{}'", branch_name(name)))?;
        Ok(())
    }
}

async fn branch_exists(repo: &Path, branch: &str) -> Result<bool> {
    let reference = format!("refs/heads/{branch}");
    let status = Command::new("git")
        .current_dir(repo)
        .args(["show-ref", "--verify", "--quiet", &reference])
        .status()
        .await
        .context("Failed to run git show-ref")?;
    Ok(status.success())
}

/// Scans `git worktree list --porcelain` output for a usable worktree on
/// `branch`. Entries git marks prunable have lost their directory.
fn worktree_on_branch(listing: &str, branch: &str) -> bool {
    let wanted = format!("branch refs/heads/{branch}");
    listing.split("\n\n").any(|entry| {
        let mut on_branch = false;
        let mut prunable = false;
        for line in entry.lines().map(str::trim) {
            on_branch |= line == wanted;
            prunable |= line.starts_with("prunable");
        }
        on_branch && !prunable
    })
}
