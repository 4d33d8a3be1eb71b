//! Metadata store: one JSON record per sandbox.
//!
//! Records live at `<state>/sandboxes/<name>.json` and are only ever written
//! wholesale. Writes go through a temp file in the same directory and a
//! rename, so a crash never leaves a half-written record behind.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CorralError;
use crate::layout::StateLayout;
use crate::names::validate_name;
use crate::workspace::WorkspaceMode;

/// Persisted description of one sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SandboxRecord {
    pub name: String,
    pub template: String,
    pub workspace: PathBuf,
    pub network_slot: u8,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub workspace_mode: WorkspaceMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repo: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_container_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_backend: Option<String>,
}

/// Result of scanning every record file.
#[derive(Debug, Default)]
pub(crate) struct Listing {
    /// Records that parsed and validated, sorted by name.
    pub records: Vec<SandboxRecord>,
    /// Record files that could not be loaded, with the reason.
    pub invalid: Vec<(String, CorralError)>,
}

impl Listing {
    /// Names of the valid records.
    pub fn names(&self) -> BTreeSet<String> {
        self.records.iter().map(|r| r.name.clone()).collect()
    }
}

/// File-per-record store under the layout's records directory.
#[derive(Debug, Clone)]
pub(crate) struct MetadataStore {
    layout: StateLayout,
}

impl MetadataStore {
    pub fn new(layout: StateLayout) -> Self {
        Self { layout }
    }

    /// Writes `record`, replacing any existing one.
    pub fn save(&self, record: &SandboxRecord) -> Result<()> {
        let path = self.layout.record_file(&record.name);
        let content =
            serde_json::to_string_pretty(record).context("Failed to serialize sandbox record")?;
        write_atomic(&path, content.as_bytes())
    }

    /// Loads and validates the record for `name`.
    pub fn load(&self, name: &str) -> Result<SandboxRecord, CorralError> {
        validate_name(name)?;
        let path = self.layout.record_file(name);
        if !path.is_file() {
            return Err(CorralError::sandbox_not_found(name));
        }
        let content = fs::read_to_string(&path).map_err(|e| {
            CorralError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        let record: SandboxRecord = serde_json::from_str(&content)
            .map_err(|e| CorralError::config(format!("malformed {}: {e}", path.display())))?;

        if record.name != name {
            return Err(CorralError::config(format!(
                "{} holds record for '{}'",
                path.display(),
                record.name
            )));
        }
        if record.network_slot == 0 || record.network_slot == u8::MAX {
            return Err(CorralError::config(format!(
                "{} has network slot {} outside 1-254",
                path.display(),
                record.network_slot
            )));
        }
        Ok(record)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.layout.record_file(name).is_file()
    }

    /// Removes the record file; `false` if there was none.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let path = self.layout.record_file(name);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to delete record: {}", path.display()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Loads every record file, separating valid records from broken ones.
    pub fn list(&self) -> Result<Listing> {
        let mut listing = Listing::default();
        for name in self.layout.scan_record_names()? {
            match self.load(&name) {
                Ok(record) => listing.records.push(record),
                Err(e) => listing.invalid.push((name, e)),
            }
        }
        Ok(listing)
    }

    /// Slots held by valid records.
    pub fn used_slots(&self) -> Result<BTreeSet<u8>> {
        Ok(self
            .list()?
            .records
            .iter()
            .map(|r| r.network_slot)
            .collect())
    }
}

/// Writes `bytes` to `path` via a temp file in the same directory and a
/// rename. Parent directories are created as needed.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .with_context(|| format!("{} has no parent directory", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;

    let file_name = path
        .file_name()
        .with_context(|| format!("{} has no file name", path.display()))?
        .to_string_lossy();
    let tmp = parent.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

    fs::write(&tmp, bytes).with_context(|| format!("Failed to write {}", tmp.display()))?;
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e).with_context(|| format!("Failed to write {}", path.display()));
    }
    Ok(())
}
