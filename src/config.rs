use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::allocator::SlotRange;
use crate::permissions::NetworkPolicy;

const CONFIG_ENV: &str = "CORRAL_CONFIG";
const STATE_DIR_ENV: &str = "CORRAL_STATE_DIR";

/// Name of the template that is always available.
pub(crate) const DEFAULT_TEMPLATE: &str = "default";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Template used by `up` when none is given
    #[serde(default = "default_template_name")]
    pub default_template: String,
    /// Named sandbox templates
    #[serde(default)]
    pub templates: BTreeMap<String, Template>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            paths: PathsConfig::default(),
            runtime: RuntimeConfig::default(),
            network: NetworkConfig::default(),
            lifecycle: LifecycleConfig::default(),
            monitor: MonitorConfig::default(),
            default_template: default_template_name(),
            templates: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct PathsConfig {
    /// Root of all persisted sandbox state
    /// - Default: `<data_dir>/corral`
    /// - Overridden by `CORRAL_STATE_DIR`
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

/// Which container backend to drive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum BackendChoice {
    /// Docker if the daemon answers, else nixos-container if installed
    #[default]
    Auto,
    Docker,
    NixosContainer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct RuntimeConfig {
    #[serde(default)]
    pub backend: BackendChoice,

    /// Prefix for Docker container names
    #[serde(default = "default_container_prefix")]
    pub container_prefix: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendChoice::Auto,
            container_prefix: default_container_prefix(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct NetworkConfig {
    /// Lowest assignable slot
    #[serde(default = "default_slot_min")]
    pub slot_min: u8,

    /// Highest assignable slot
    #[serde(default = "default_slot_max")]
    pub slot_max: u8,

    /// First two octets of every sandbox subnet (`<prefix>.<slot>.0/24`)
    #[serde(default = "default_subnet_prefix")]
    pub subnet_prefix: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            slot_min: default_slot_min(),
            slot_max: default_slot_max(),
            subnet_prefix: default_subnet_prefix(),
        }
    }
}

impl NetworkConfig {
    pub fn slot_range(&self) -> SlotRange {
        SlotRange::new(self.slot_min, self.slot_max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct LifecycleConfig {
    /// Readiness poll attempts after create/reset
    #[serde(default = "default_ready_attempts")]
    pub ready_attempts: u32,

    /// Delay between readiness polls
    #[serde(default = "default_ready_interval_ms")]
    pub ready_interval_ms: u64,

    /// Grace period for `stop` and `down --graceful`
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            ready_attempts: default_ready_attempts(),
            ready_interval_ms: default_ready_interval_ms(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl LifecycleConfig {
    pub fn ready_interval(&self) -> Duration {
        Duration::from_millis(self.ready_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MonitorConfig {
    /// Seconds between health sweeps
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Start stopped or unhealthy sandboxes
    #[serde(default)]
    pub auto_restart: bool,

    /// Log every observation, not just changes that lead to action
    #[serde(default = "default_true")]
    pub log_observations: bool,

    /// Port probed on each sandbox address
    #[serde(default = "default_probe_port")]
    pub probe_port: u16,

    /// HTTP path requested by the reachability probe
    #[serde(default = "default_probe_path")]
    pub probe_path: String,

    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Command run inside the container to detect an active agent session,
    /// e.g. `tmux has-session -t agent`
    #[serde(default)]
    pub session_probe: Option<String>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval(),
            auto_restart: false,
            log_observations: true,
            probe_port: default_probe_port(),
            probe_path: default_probe_path(),
            probe_timeout_ms: default_probe_timeout_ms(),
            session_probe: None,
        }
    }
}

/// Static description of what a sandbox of a given kind contains.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Template {
    #[serde(default)]
    pub description: String,

    /// Container image (Docker) or base system label (nixos-container)
    #[serde(default = "default_image")]
    pub image: String,

    /// Extra packages installed into the sandbox
    #[serde(default)]
    pub packages: Vec<String>,

    /// Environment passed to the sandbox
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Host environment variables copied into `/run/secrets`
    #[serde(default)]
    pub secrets: Vec<String>,

    /// Memory limit (e.g., "8g")
    #[serde(default)]
    pub memory: Option<String>,

    /// CPU limit (e.g., "4")
    #[serde(default)]
    pub cpus: Option<String>,

    /// Default network policy
    #[serde(default)]
    pub network: NetworkPolicy,

    /// Allowed domains when network = "allowlist"
    #[serde(default)]
    pub allowed_domains: Vec<String>,
}

impl Default for Template {
    fn default() -> Self {
        Self {
            description: "General-purpose agent sandbox".to_string(),
            image: default_image(),
            packages: Vec::new(),
            env: BTreeMap::new(),
            secrets: Vec::new(),
            memory: None,
            cpus: None,
            network: NetworkPolicy::default(),
            allowed_domains: Vec::new(),
        }
    }
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_template_name() -> String {
    DEFAULT_TEMPLATE.to_string()
}

fn default_container_prefix() -> String {
    "corral-".to_string()
}

fn default_slot_min() -> u8 {
    1
}

fn default_slot_max() -> u8 {
    254
}

fn default_subnet_prefix() -> String {
    "10.233".to_string()
}

fn default_ready_attempts() -> u32 {
    30
}

fn default_ready_interval_ms() -> u64 {
    1000
}

fn default_stop_timeout_secs() -> u64 {
    10
}

fn default_monitor_interval() -> u64 {
    30
}

fn default_probe_port() -> u16 {
    8080
}

fn default_probe_path() -> String {
    "/".to_string()
}

fn default_probe_timeout_ms() -> u64 {
    2000
}

fn default_image() -> String {
    "corral:latest".to_string()
}

impl Config {
    /// Load configuration, using defaults if no file exists.
    ///
    /// Precedence: explicit path > `CORRAL_CONFIG` > `<config_dir>/corral/config.toml`.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let path = explicit
            .map(Path::to_path_buf)
            .or(env_path)
            .or_else(|| dirs::config_dir().map(|d| d.join("corral").join("config.toml")));

        let mut config = match path {
            Some(ref p) if p.exists() => Self::load_file(p)?,
            Some(ref p) if explicit.is_some() => {
                anyhow::bail!("Config file not found: {}", p.display())
            }
            _ => Self::default(),
        };

        if let Some(dir) = std::env::var_os(STATE_DIR_ENV) {
            config.paths.state_dir = Some(PathBuf::from(dir));
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse a config file.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.network.slot_min == 0
            || self.network.slot_max == u8::MAX
            || self.network.slot_min > self.network.slot_max
        {
            anyhow::bail!(
                "Invalid slot range {}-{}: expected 1 <= slot_min <= slot_max <= 254",
                self.network.slot_min,
                self.network.slot_max
            );
        }
        crate::allocator::parse_prefix(&self.network.subnet_prefix)?;
        if self.lifecycle.ready_attempts == 0 {
            anyhow::bail!("lifecycle.ready_attempts must be at least 1");
        }
        Ok(())
    }

    /// Resolved state directory.
    pub fn state_dir(&self) -> Result<PathBuf> {
        match self.paths.state_dir {
            Some(ref dir) => Ok(dir.clone()),
            None => dirs::data_dir()
                .map(|d| d.join("corral"))
                .context("Could not determine data directory; set paths.state_dir"),
        }
    }

    /// Look up a template by name; `default` always resolves.
    pub fn template(&self, name: &str) -> Option<Template> {
        match self.templates.get(name) {
            Some(template) => Some(template.clone()),
            None if name == DEFAULT_TEMPLATE => Some(Template::default()),
            None => None,
        }
    }

    /// Names of all resolvable templates.
    pub fn template_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.templates.keys().cloned().collect();
        if !self.templates.contains_key(DEFAULT_TEMPLATE) {
            names.insert(0, DEFAULT_TEMPLATE.to_string());
        }
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runtime.backend, BackendChoice::Auto);
        assert_eq!(config.network.slot_range(), SlotRange::new(1, 254));
        assert_eq!(config.lifecycle.ready_attempts, 30);
        assert_eq!(config.lifecycle.ready_interval(), Duration::from_secs(1));
        assert!(!config.monitor.auto_restart);
        assert_eq!(config.default_template, "default");
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
default_template = "rust"

[paths]
state_dir = "/var/lib/corral"

[runtime]
backend = "nixos-container"

[network]
slot_min = 10
slot_max = 20

[monitor]
auto_restart = true
session_probe = "tmux has-session -t agent"

[templates.rust]
image = "corral-rust:latest"
packages = ["cargo", "rustc"]
secrets = ["GITHUB_TOKEN"]
network = "allowlist"
allowed_domains = ["crates.io"]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.backend, BackendChoice::NixosContainer);
        assert_eq!(config.runtime.container_prefix, "corral-");
        assert_eq!(config.network.slot_range(), SlotRange::new(10, 20));
        assert!(config.monitor.auto_restart);
        assert_eq!(
            config.monitor.session_probe.as_deref(),
            Some("tmux has-session -t agent")
        );
        assert_eq!(
            config.state_dir().unwrap(),
            PathBuf::from("/var/lib/corral")
        );

        let rust = config.template("rust").unwrap();
        assert_eq!(rust.image, "corral-rust:latest");
        assert_eq!(rust.network, NetworkPolicy::Allowlist);
        assert_eq!(rust.secrets, vec!["GITHUB_TOKEN".to_string()]);
    }

    #[test]
    fn test_default_template_always_available() {
        let config = Config::default();
        assert!(config.template(DEFAULT_TEMPLATE).is_some());
        assert!(config.template("missing").is_none());
        assert_eq!(config.template_names(), vec!["default".to_string()]);
    }

    #[test]
    fn test_invalid_slot_range_rejected() {
        let mut config = Config::default();
        config.network.slot_min = 50;
        config.network.slot_max = 10;
        assert!(config.validate().is_err());

        config.network.slot_min = 0;
        config.network.slot_max = 10;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[network\nslot_min = ").unwrap();

        let err = Config::load_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }
}
