//! Container config generation.
//!
//! The generator turns a template plus per-sandbox inputs into the TOML
//! sidecar at `<state>/configs/<name>.toml`. Runtimes only ever consume the
//! parsed sidecar ([`ContainerSpec`]), which is what lets `reset` rebuild a
//! container without regenerating anything.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use crate::allocator::SlotAddresses;
use crate::config::Template;
use crate::error::CorralError;
use crate::permissions::{NetworkPolicy, PermissionOverlay};
use crate::templates;
use crate::workspace::WorkspaceMode;

/// Where the workspace appears inside the sandbox.
pub(crate) const WORKSPACE_MOUNT: &str = "/workspace";

/// Where secret files appear inside the sandbox.
pub(crate) const SECRETS_MOUNT: &str = "/run/secrets";

/// Where generated docs are injected.
pub(crate) const DOCS_PATH: &str = "/etc/corral/SANDBOX.md";

/// Parsed container config sidecar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ContainerSpec {
    pub sandbox: String,
    pub template: String,
    pub image: String,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpus: Option<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    pub network: NetworkSpec,
    #[serde(default)]
    pub mounts: Vec<MountSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct NetworkSpec {
    pub slot: u8,
    pub host_address: Ipv4Addr,
    pub guest_address: Ipv4Addr,
    pub policy: NetworkPolicy,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct MountSpec {
    pub host: PathBuf,
    pub container: String,
    #[serde(default)]
    pub readonly: bool,
}

impl ContainerSpec {
    /// Reads the config sidecar at `path`.
    pub fn load(path: &Path) -> Result<Self, CorralError> {
        if !path.is_file() {
            return Err(CorralError::config(format!(
                "container config missing: {}",
                path.display()
            )));
        }
        let content = fs::read_to_string(path).map_err(|e| {
            CorralError::config(format!("failed to read {}: {e}", path.display()))
        })?;
        toml::from_str(&content)
            .map_err(|e| CorralError::config(format!("malformed {}: {e}", path.display())))
    }

    fn from_inputs(inputs: &SandboxInputs<'_>) -> Result<Self> {
        let addresses = SlotAddresses::new(inputs.subnet_prefix, inputs.slot)?;
        let (policy, allowed_domains) = match inputs.overlay {
            Some(overlay) => (overlay.network, overlay.allowed_domains.clone()),
            None => {
                let resolved = PermissionOverlay::new(
                    inputs.template.network,
                    inputs.template.allowed_domains.clone(),
                );
                (resolved.network, resolved.allowed_domains)
            }
        };

        let mut mounts = vec![MountSpec {
            host: inputs.workspace.to_path_buf(),
            container: WORKSPACE_MOUNT.to_string(),
            readonly: false,
        }];
        if let Some(secrets) = inputs.secrets_dir {
            mounts.push(MountSpec {
                host: secrets.to_path_buf(),
                container: SECRETS_MOUNT.to_string(),
                readonly: true,
            });
        }

        let mut env = inputs.template.env.clone();
        env.insert("CORRAL_SANDBOX".to_string(), inputs.name.to_string());

        Ok(Self {
            sandbox: inputs.name.to_string(),
            template: inputs.template_name.to_string(),
            image: inputs.template.image.clone(),
            packages: inputs.template.packages.clone(),
            memory: inputs.template.memory.clone(),
            cpus: inputs.template.cpus.clone(),
            env,
            network: NetworkSpec {
                slot: inputs.slot,
                host_address: addresses.host,
                guest_address: addresses.guest,
                policy,
                allowed_domains,
            },
            mounts,
        })
    }

    /// Host directory mounted at [`WORKSPACE_MOUNT`].
    pub fn workspace(&self) -> Option<&Path> {
        self.mounts
            .iter()
            .find(|m| m.container == WORKSPACE_MOUNT)
            .map(|m| m.host.as_path())
    }
}

/// Everything the generator needs to know about one sandbox.
#[derive(Debug, Clone, Copy)]
pub(crate) struct SandboxInputs<'a> {
    pub name: &'a str,
    pub template_name: &'a str,
    pub template: &'a Template,
    pub workspace: &'a Path,
    pub slot: u8,
    pub subnet_prefix: &'a str,
    pub secrets_dir: Option<&'a Path>,
    pub overlay: Option<&'a PermissionOverlay>,
}

/// Pure function from sandbox inputs to container config text.
pub(crate) trait ConfigGenerator: Send + Sync {
    fn generate(&self, inputs: &SandboxInputs<'_>) -> Result<String>;
}

/// Emits the TOML form of [`ContainerSpec`].
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TomlConfigGenerator;

impl ConfigGenerator for TomlConfigGenerator {
    fn generate(&self, inputs: &SandboxInputs<'_>) -> Result<String> {
        let spec = ContainerSpec::from_inputs(inputs)?;
        let body = toml::to_string_pretty(&spec).context("Failed to serialize container config")?;
        Ok(format!(
            "# Generated by corral for sandbox {}. Regenerated by `corral net`.\n{body}",
            inputs.name
        ))
    }
}

/// Markdown summary injected into the sandbox.
pub(crate) fn render_docs(spec: &ContainerSpec, mode: WorkspaceMode) -> String {
    let network_notes = match spec.network.policy {
        NetworkPolicy::AllowAll => "Outbound network access is unrestricted.".to_string(),
        NetworkPolicy::Deny => "Outbound network access is blocked.".to_string(),
        NetworkPolicy::Allowlist => {
            let mut notes = String::from("Outbound access is limited to:\n\n");
            for domain in &spec.network.allowed_domains {
                writeln!(notes, "- `{domain}`").unwrap();
            }
            notes
        }
    };

    templates::render(
        templates::SANDBOX_DOCS,
        &[
            ("name", spec.sandbox.clone()),
            ("template", spec.template.clone()),
            ("image", spec.image.clone()),
            ("slot", spec.network.slot.to_string()),
            ("guest_address", spec.network.guest_address.to_string()),
            ("host_address", spec.network.host_address.to_string()),
            ("workspace_mount", WORKSPACE_MOUNT.to_string()),
            ("workspace_mode", mode.to_string()),
            ("policy", spec.network.policy.to_string()),
            ("network_notes", network_notes),
            ("secrets_mount", SECRETS_MOUNT.to_string()),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inputs<'a>(template: &'a Template, secrets: Option<&'a Path>) -> SandboxInputs<'a> {
        SandboxInputs {
            name: "alpha",
            template_name: "default",
            template,
            workspace: Path::new("/src/app"),
            slot: 9,
            subnet_prefix: "10.233",
            secrets_dir: secrets,
            overlay: None,
        }
    }

    #[test]
    fn test_generate_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let template = Template {
            memory: Some("4g".into()),
            ..Template::default()
        };
        let text = TomlConfigGenerator
            .generate(&inputs(&template, Some(Path::new("/state/secrets/alpha"))))
            .unwrap();

        let path = dir.path().join("alpha.toml");
        fs::write(&path, text).unwrap();
        let spec = ContainerSpec::load(&path).unwrap();

        assert_eq!(spec.sandbox, "alpha");
        assert_eq!(spec.memory.as_deref(), Some("4g"));
        assert_eq!(spec.network.guest_address, Ipv4Addr::new(10, 233, 9, 2));
        assert_eq!(spec.env.get("CORRAL_SANDBOX").map(String::as_str), Some("alpha"));
        assert_eq!(spec.workspace(), Some(Path::new("/src/app")));
        assert_eq!(spec.mounts.len(), 2);
        assert!(spec.mounts[1].readonly);
    }

    #[test]
    fn test_overlay_overrides_template_policy() {
        let template = Template::default();
        let overlay = PermissionOverlay::new(NetworkPolicy::Deny, Vec::new());
        let mut with_overlay = inputs(&template, None);
        with_overlay.overlay = Some(&overlay);

        let spec = ContainerSpec::from_inputs(&with_overlay).unwrap();
        assert_eq!(spec.network.policy, NetworkPolicy::Deny);
        assert_eq!(spec.mounts.len(), 1);
    }

    #[test]
    fn test_template_allowlist_gets_common_domains() {
        let template = Template {
            network: NetworkPolicy::Allowlist,
            ..Template::default()
        };
        let spec = ContainerSpec::from_inputs(&inputs(&template, None)).unwrap();
        assert!(spec.network.allowed_domains.iter().any(|d| d == "github.com"));
    }

    #[test]
    fn test_load_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("gone.toml");
        assert!(matches!(
            ContainerSpec::load(&path).unwrap_err(),
            CorralError::Config { .. }
        ));

        fs::write(&path, "sandbox = ").unwrap();
        assert!(matches!(
            ContainerSpec::load(&path).unwrap_err(),
            CorralError::Config { .. }
        ));
    }

    #[test]
    fn test_render_docs() {
        let template = Template {
            network: NetworkPolicy::Allowlist,
            allowed_domains: vec!["crates.io".into()],
            ..Template::default()
        };
        let spec = ContainerSpec::from_inputs(&inputs(&template, None)).unwrap();
        let docs = render_docs(&spec, WorkspaceMode::Git);

        assert!(docs.starts_with("# Sandbox alpha"));
        assert!(docs.contains("10.233.9.2"));
        assert!(docs.contains("(git)"));
        assert!(docs.contains("- `crates.io`"));
        assert!(!docs.contains("{{"));
    }
}
