//! Network policy and per-sandbox permission overlays.
//!
//! The overlay file `<name>.permissions.json` sits next to the sandbox record
//! and overrides the template's network policy. Reconfiguration rewrites it
//! wholesale; there is no partial update.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::error::CorralError;
use crate::store::write_atomic;

/// Network access policy for sandbox containers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum NetworkPolicy {
    /// Allow all network access
    #[default]
    AllowAll,
    /// Only allow specific domains
    Allowlist,
    /// No network access
    Deny,
}

impl std::fmt::Display for NetworkPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AllowAll => write!(f, "allow-all"),
            Self::Allowlist => write!(f, "allowlist"),
            Self::Deny => write!(f, "deny"),
        }
    }
}

impl std::str::FromStr for NetworkPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "allow-all" | "all" => Ok(Self::AllowAll),
            "allowlist" => Ok(Self::Allowlist),
            "deny" | "none" => Ok(Self::Deny),
            _ => anyhow::bail!("Unknown network policy: '{s}'. Supported: allow-all, allowlist, deny"),
        }
    }
}

/// Domains allowed when an allowlist is requested without explicit entries
pub const COMMON_ALLOWED_DOMAINS: &[&str] = &[
    // Git hosting
    "github.com",
    "gitlab.com",
    "bitbucket.org",
    // Package registries
    "registry.npmjs.org",
    "pypi.org",
    "crates.io",
    "cache.nixos.org",
    // AI APIs
    "api.anthropic.com",
    "api.openai.com",
];

/// Per-sandbox override of the template's network settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PermissionOverlay {
    pub network: NetworkPolicy,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl PermissionOverlay {
    /// Builds an overlay, filling an empty allowlist with the common domains.
    pub fn new(network: NetworkPolicy, allowed_domains: Vec<String>) -> Self {
        let allowed_domains = if network == NetworkPolicy::Allowlist && allowed_domains.is_empty()
        {
            COMMON_ALLOWED_DOMAINS.iter().map(ToString::to_string).collect()
        } else {
            allowed_domains
        };
        Self {
            network,
            allowed_domains,
        }
    }

    /// Loads an overlay; `None` when the file does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, CorralError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|e| {
            CorralError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map(Some)
            .map_err(|e| CorralError::config(format!("malformed {}: {e}", path.display())))
    }

    /// Writes the overlay, replacing any previous one.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        write_atomic(path, content.as_bytes())
    }
}
