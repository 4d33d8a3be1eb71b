//! Container runtime abstraction.
//!
//! A [`Runtime`] is a uniform interface over one container backend. The base
//! contract covers create/start/stop/destroy/exec/list/status; optional
//! capabilities (graceful stop with a timeout, log viewing) are exposed via
//! `Option` accessors so callers branch on their presence instead of failing.
//!
//! Every operation is an `async fn`: callers cancel an in-flight operation by
//! dropping its future (directly, via `tokio::time::timeout`, or by losing a
//! `tokio::select!` race).

mod docker;
mod error;
#[cfg(test)]
pub(crate) mod fake;
mod nixos;

pub(crate) use docker::DockerRuntime;
pub(crate) use error::RuntimeError;
pub(crate) use nixos::NixosContainerRuntime;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::debug;

use crate::generator::ContainerSpec;

/// Result alias for runtime backend calls.
pub(crate) type RuntimeResult<T> = Result<T, RuntimeError>;

/// Prefix used for `nixos-container` names, which are capped at 11 characters.
const NIXOS_PREFIX: &str = "cr-";
const NIXOS_MAX_NAME: usize = 11;

/// Supported runtime backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum BackendKind {
    /// Docker daemon, driven through its HTTP API.
    Docker,
    /// NixOS declarative containers (`nixos-container`, systemd-nspawn).
    NixosContainer,
}

impl BackendKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Docker => "docker",
            Self::NixosContainer => "nixos-container",
        }
    }

    /// Derives the container name a sandbox gets on this backend.
    pub fn container_name(self, prefix: &str, sandbox: &str) -> String {
        match self {
            Self::Docker => format!("{prefix}{sandbox}"),
            Self::NixosContainer => {
                let candidate = format!("{NIXOS_PREFIX}{sandbox}");
                if candidate.len() <= NIXOS_MAX_NAME {
                    candidate
                } else {
                    let head: String = sandbox.chars().take(4).collect();
                    format!("{NIXOS_PREFIX}{head}{:04x}", fnv1a(sandbox) & 0xffff)
                }
            }
        }
    }

    /// Returns true if `container` follows this backend's naming rule for `prefix`.
    pub fn owns_container_name(self, prefix: &str, container: &str) -> bool {
        match self {
            Self::Docker => container.starts_with(prefix),
            Self::NixosContainer => container.starts_with(NIXOS_PREFIX),
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "docker" => Ok(Self::Docker),
            "nixos-container" | "nixos" => Ok(Self::NixosContainer),
            _ => anyhow::bail!("Unknown runtime backend: '{s}'. Supported: docker, nixos-container"),
        }
    }
}

/// 32-bit FNV-1a; stable across builds, used only to shorten names.
fn fnv1a(input: &str) -> u32 {
    input.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Observed state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ContainerStatus {
    /// Container exists and its main process is live.
    Running,
    /// Container exists but is not running.
    Stopped,
    /// Backend has no container by that name.
    NotFound,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
            Self::NotFound => write!(f, "not-found"),
        }
    }
}

/// A container as reported by the backend. Never persisted by corral.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ContainerInfo {
    /// Backend-level container name.
    pub name: String,
    /// Sandbox name, when the backend can recover it (e.g. from a label).
    pub sandbox: Option<String>,
    pub status: ContainerStatus,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
}

impl ContainerInfo {
    /// Info for a container the backend does not know about.
    pub fn not_found(name: &str) -> Self {
        Self {
            name: name.to_string(),
            sandbox: None,
            status: ContainerStatus::NotFound,
            created_at: None,
            started_at: None,
        }
    }

    /// Whether the container's main process is live.
    pub fn is_running(&self) -> bool {
        self.status == ContainerStatus::Running
    }

    /// Time since the container was last started, if it is running.
    pub fn uptime(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        match (self.status, self.started_at) {
            (ContainerStatus::Running, Some(started)) => Some(now.signed_duration_since(started)),
            _ => None,
        }
    }
}

/// Everything a backend needs to instantiate a sandbox container.
#[derive(Debug, Clone)]
pub(crate) struct CreateOptions {
    /// Resolved container name.
    pub container: String,
    /// Owning sandbox.
    pub sandbox: String,
    /// Parsed container config sidecar.
    pub spec: ContainerSpec,
    /// Start the container right after creating it.
    pub start: bool,
}

/// Options for a non-interactive exec.
#[derive(Debug, Clone, Default)]
pub(crate) struct ExecOptions {
    /// Bytes written to the process's stdin, which is then closed.
    pub stdin: Option<Vec<u8>>,
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
}

/// Captured result of a non-interactive exec.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct ExecOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the process exited with status zero.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Uniform interface over a container backend.
#[async_trait]
pub(crate) trait Runtime: Send + Sync {
    /// Which backend this is.
    fn kind(&self) -> BackendKind;

    /// Creates a container; it is left stopped unless `opts.start` is set.
    async fn create(&self, opts: &CreateOptions) -> RuntimeResult<()>;

    /// Starts an existing container.
    async fn start(&self, name: &str) -> RuntimeResult<()>;

    /// Stops a running container.
    async fn stop(&self, name: &str) -> RuntimeResult<()>;

    /// Removes a container. Succeeds silently when it does not exist.
    async fn destroy(&self, name: &str) -> RuntimeResult<()>;

    /// Reports the container's current state; a missing container is
    /// `ContainerStatus::NotFound`, not an error.
    async fn status(&self, name: &str) -> RuntimeResult<ContainerInfo>;

    /// Whether the container is running.
    async fn is_running(&self, name: &str) -> RuntimeResult<bool> {
        Ok(self.status(name).await?.is_running())
    }

    /// Runs a command inside the container and captures its output.
    async fn exec(&self, name: &str, argv: &[String], opts: &ExecOptions)
        -> RuntimeResult<ExecOutput>;

    /// Runs a command attached to the caller's terminal; returns its exit code.
    async fn exec_interactive(&self, name: &str, argv: &[String]) -> RuntimeResult<i32>;

    /// Lists containers managed by corral on this backend.
    async fn list(&self) -> RuntimeResult<Vec<ContainerInfo>>;

    /// Writes `content` to `path` inside a running container, creating the
    /// parent directory. The default pipes the bytes through `sh` via `exec`.
    async fn write_file(&self, name: &str, path: &str, content: &[u8]) -> RuntimeResult<()> {
        let quoted = shell_words::quote(path);
        let script = format!("mkdir -p \"$(dirname {quoted})\" && cat > {quoted}");
        let argv = ["sh".to_string(), "-c".to_string(), script];
        let opts = ExecOptions {
            stdin: Some(content.to_vec()),
            ..ExecOptions::default()
        };
        let output = self.exec(name, &argv, &opts).await?;
        if output.success() {
            Ok(())
        } else {
            Err(RuntimeError::command_failed(format!(
                "writing {path} exited with {}: {}",
                output.exit_code,
                output.stderr.trim()
            )))
        }
    }

    /// Graceful-stop capability, if the backend has one.
    fn graceful_stop(&self) -> Option<&dyn GracefulStop> {
        None
    }

    /// Log-viewing capability, if the backend has one.
    fn log_viewer(&self) -> Option<&dyn LogViewer> {
        None
    }
}

/// Stop with a bounded wait for voluntary shutdown before a hard stop.
#[async_trait]
pub(crate) trait GracefulStop: Send + Sync {
    /// Asks the container to stop, forcing it after `timeout`.
    async fn stop_with_timeout(&self, name: &str, timeout: Duration) -> RuntimeResult<()>;
}

/// Container log access.
#[async_trait]
pub(crate) trait LogViewer: Send + Sync {
    /// Returns the container's combined stdout/stderr, optionally only the last `tail` lines.
    async fn logs(&self, name: &str, tail: Option<usize>) -> RuntimeResult<String>;
}

/// Stops gracefully when the backend supports it, otherwise falls back to a plain stop.
pub(crate) async fn stop_with_timeout(
    runtime: &dyn Runtime,
    name: &str,
    timeout: Duration,
) -> RuntimeResult<()> {
    match runtime.graceful_stop() {
        Some(graceful) => graceful.stop_with_timeout(name, timeout).await,
        None => {
            debug!(
                backend = %runtime.kind(),
                "Graceful stop unsupported, falling back to plain stop"
            );
            runtime.stop(name).await
        }
    }
}
