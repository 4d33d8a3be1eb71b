//! Filesystem layout of the state directory.
//!
//! ```text
//! <state>/
//! ├── sandboxes/<name>.json              # SandboxRecord
//! ├── sandboxes/<name>.permissions.json  # permission overlay
//! ├── configs/<name>.toml                # generated container config
//! ├── docs/<name>.md                     # generated sandbox docs
//! ├── secrets/<name>/                    # secret material (0700)
//! ├── workspaces/<name>/                 # managed workspaces
//! ├── logs/                              # monitor logs
//! └── audit.jsonl                        # audit events
//! ```
//!
//! Sidecars are tied to a record only by their filename, so the scanner here is
//! what the GC reconciler uses to rediscover them.

use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::names::is_valid_name;

/// Directory permissions for secret material: owner only (0700).
pub(crate) const SECRET_DIR_PERMISSIONS: u32 = 0o700;

const PERMISSIONS_SUFFIX: &str = ".permissions.json";

type EntryParser = fn(&str) -> Option<(String, SidecarKind)>;

/// Kinds of per-sandbox files the scanner recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum SidecarKind {
    Record,
    Permissions,
    Config,
    Docs,
}

/// Paths of everything corral keeps on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StateLayout {
    root: PathBuf,
}

impl StateLayout {
    /// Computes paths under `root`; nothing is created.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn records_dir(&self) -> PathBuf {
        self.root.join("sandboxes")
    }

    pub fn configs_dir(&self) -> PathBuf {
        self.root.join("configs")
    }

    pub fn docs_dir(&self) -> PathBuf {
        self.root.join("docs")
    }

    pub fn secrets_root(&self) -> PathBuf {
        self.root.join("secrets")
    }

    pub fn workspaces_root(&self) -> PathBuf {
        self.root.join("workspaces")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn audit_log(&self) -> PathBuf {
        self.root.join("audit.jsonl")
    }

    pub fn record_file(&self, name: &str) -> PathBuf {
        self.records_dir().join(format!("{name}.json"))
    }

    pub fn permissions_file(&self, name: &str) -> PathBuf {
        self.records_dir().join(format!("{name}{PERMISSIONS_SUFFIX}"))
    }

    pub fn config_file(&self, name: &str) -> PathBuf {
        self.configs_dir().join(format!("{name}.toml"))
    }

    pub fn docs_file(&self, name: &str) -> PathBuf {
        self.docs_dir().join(format!("{name}.md"))
    }

    pub fn secrets_dir(&self, name: &str) -> PathBuf {
        self.secrets_root().join(name)
    }

    pub fn workspace_dir(&self, name: &str) -> PathBuf {
        self.workspaces_root().join(name)
    }

    /// Creates the directory skeleton.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            self.records_dir(),
            self.configs_dir(),
            self.docs_dir(),
            self.workspaces_root(),
            self.logs_dir(),
        ] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
        }

        let secrets = self.secrets_root();
        fs::create_dir_all(&secrets)
            .with_context(|| format!("Failed to create directory: {}", secrets.display()))?;
        fs::set_permissions(&secrets, fs::Permissions::from_mode(SECRET_DIR_PERMISSIONS))
            .with_context(|| format!("Failed to set permissions on: {}", secrets.display()))?;
        Ok(())
    }

    /// The discoverable sidecar files for `name` (record last, so it is the
    /// final thing removed when deleting in order).
    pub fn sidecar_files(&self, name: &str) -> Vec<(SidecarKind, PathBuf)> {
        vec![
            (SidecarKind::Config, self.config_file(name)),
            (SidecarKind::Docs, self.docs_file(name)),
            (SidecarKind::Permissions, self.permissions_file(name)),
            (SidecarKind::Record, self.record_file(name)),
        ]
    }

    /// Sandbox names inferable from sidecar filenames on disk.
    pub fn scan_disk_names(&self) -> Result<BTreeSet<String>> {
        let mut names = BTreeSet::new();
        for (dir, parse) in [
            (self.records_dir(), parse_records_dir_entry as EntryParser),
            (self.configs_dir(), parse_configs_dir_entry as EntryParser),
            (self.docs_dir(), parse_docs_dir_entry as EntryParser),
        ] {
            for file_name in list_file_names(&dir)? {
                if let Some((name, _)) = parse(&file_name) {
                    names.insert(name);
                }
            }
        }
        Ok(names)
    }

    /// Names with a file that looks like a record (`<name>.json`).
    pub fn scan_record_names(&self) -> Result<BTreeSet<String>> {
        Ok(list_file_names(&self.records_dir())?
            .iter()
            .filter_map(|f| parse_records_dir_entry(f))
            .filter(|(_, kind)| *kind == SidecarKind::Record)
            .map(|(name, _)| name)
            .collect())
    }
}

/// Regular files in `dir`; a missing directory is empty.
fn list_file_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let entries =
        fs::read_dir(dir).with_context(|| format!("Failed to read {}", dir.display()))?;
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            if let Some(name) = entry.file_name().to_str() {
                files.push(name.to_string());
            }
        }
    }
    Ok(files)
}

/// `<name>.permissions.json` or `<name>.json`; anything with another embedded
/// dot is not a record.
pub(crate) fn parse_records_dir_entry(file_name: &str) -> Option<(String, SidecarKind)> {
    if let Some(stem) = file_name.strip_suffix(PERMISSIONS_SUFFIX) {
        return trusted(stem).map(|n| (n, SidecarKind::Permissions));
    }
    let stem = file_name.strip_suffix(".json")?;
    trusted(stem).map(|n| (n, SidecarKind::Record))
}

fn parse_configs_dir_entry(file_name: &str) -> Option<(String, SidecarKind)> {
    let stem = file_name.strip_suffix(".toml")?;
    trusted(stem).map(|n| (n, SidecarKind::Config))
}

fn parse_docs_dir_entry(file_name: &str) -> Option<(String, SidecarKind)> {
    let stem = file_name.strip_suffix(".md")?;
    trusted(stem).map(|n| (n, SidecarKind::Docs))
}

fn trusted(stem: &str) -> Option<String> {
    is_valid_name(stem).then(|| stem.to_string())
}
