//! Secret material for sandboxes.
//!
//! Templates name host environment variables; each one present is copied into
//! `<state>/secrets/<name>/<VAR>` and mounted read-only in the container.

use anyhow::{Context, Result};
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::layout::SECRET_DIR_PERMISSIONS;

/// File permissions for individual secrets (0600).
const SECRET_FILE_PERMISSIONS: u32 = 0o600;

/// Writes each available variable into `dir`, returning the names written.
///
/// Variables unset on the host are skipped. `lookup` is injected so tests do
/// not depend on the process environment.
pub(crate) fn prepare(
    dir: &Path,
    vars: &[String],
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Vec<String>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create secrets directory: {}", dir.display()))?;
    fs::set_permissions(dir, fs::Permissions::from_mode(SECRET_DIR_PERMISSIONS))
        .with_context(|| format!("Failed to set permissions on: {}", dir.display()))?;

    let mut written = Vec::new();
    for var in vars {
        let Some(value) = lookup(var) else {
            tracing::debug!(var = %var, "secret not set on host, skipping");
            continue;
        };
        let path = dir.join(var);
        fs::write(&path, value)
            .with_context(|| format!("Failed to write secret: {}", path.display()))?;
        fs::set_permissions(&path, fs::Permissions::from_mode(SECRET_FILE_PERMISSIONS))
            .with_context(|| format!("Failed to set permissions on: {}", path.display()))?;
        written.push(var.clone());
    }
    Ok(written)
}

/// Host environment lookup for [`prepare`].
pub(crate) fn from_env(var: &str) -> Option<String> {
    std::env::var(var).ok()
}

/// Removes the secrets directory; `false` if it did not exist.
pub(crate) fn remove(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(dir)
        .with_context(|| format!("Failed to remove secrets: {}", dir.display()))?;
    Ok(true)
}
