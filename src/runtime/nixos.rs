//! `nixos-container` backend.
//!
//! Shells out to the `nixos-container` tool. Container names are capped at
//! 11 characters, there are no labels, and neither graceful stop nor log
//! viewing is offered, so both capabilities are absent.

use async_trait::async_trait;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{
    BackendKind, ContainerInfo, ContainerStatus, CreateOptions, ExecOptions, ExecOutput, Runtime,
    RuntimeError, RuntimeResult,
};
use crate::generator::{ContainerSpec, MountSpec};
use crate::permissions::NetworkPolicy;
use crate::templates;

const TOOL: &str = "nixos-container";

/// Upper bound on any single `nixos-container` invocation; `create` builds a
/// system closure and can be slow.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(600);

/// Where imperative container settings live.
const DEFAULT_CONF_DIR: &str = "/etc/nixos-containers";

/// Conf-file key naming the sandbox a container belongs to. Containers
/// without it were not created by corral and are never listed.
const SANDBOX_MARKER: &str = "CORRAL_SANDBOX";

/// Runs sandboxes as imperative NixOS containers.
pub(crate) struct NixosContainerRuntime {
    conf_dir: PathBuf,
}

impl NixosContainerRuntime {
    /// Checks that the tool is installed and answers.
    pub async fn detect() -> RuntimeResult<Self> {
        run(&["list"]).await?;
        Ok(Self {
            conf_dir: PathBuf::from(DEFAULT_CONF_DIR),
        })
    }

    fn conf_file(&self, name: &str) -> PathBuf {
        self.conf_dir.join(format!("{name}.conf"))
    }

    /// Sandbox recorded in the container's conf file, if corral made it.
    fn sandbox_of(&self, container: &str) -> Option<String> {
        let conf = std::fs::read_to_string(self.conf_file(container)).ok()?;
        sandbox_marker(&conf)
    }
}

fn sandbox_marker(conf: &str) -> Option<String> {
    conf.lines()
        .filter_map(|line| line.trim().strip_prefix(SANDBOX_MARKER)?.strip_prefix('='))
        .map(|value| value.trim().trim_matches('"').to_string())
        .find(|value| !value.is_empty())
}

async fn run(args: &[&str]) -> RuntimeResult<Output> {
    let output = tokio::time::timeout(COMMAND_TIMEOUT, Command::new(TOOL).args(args).output())
        .await
        .map_err(|_| RuntimeError::timeout(COMMAND_TIMEOUT))?
        .map_err(|e| RuntimeError::unavailable(format!("failed to run {TOOL}: {e}")))?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(RuntimeError::command_failed(format!(
            "{TOOL} {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

/// NixOS module text for a container spec.
fn render_nix(spec: &ContainerSpec) -> String {
    let mut env = String::new();
    for (key, value) in &spec.env {
        writeln!(env, "    {key} = {};", nix_string(value)).unwrap();
    }
    templates::render(
        templates::CONTAINER_NIX,
        &[
            ("name", spec.sandbox.clone()),
            (
                "firewall",
                (spec.network.policy != NetworkPolicy::AllowAll).to_string(),
            ),
            ("packages", spec.packages.join(" ")),
            ("env", env),
        ],
    )
}

/// Quotes a value as a Nix string literal.
fn nix_string(value: &str) -> String {
    let escaped = value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace("${", "\\${");
    format!("\"{escaped}\"")
}

/// `EXTRA_NSPAWN_FLAGS` line binding each mount into the container.
fn nspawn_bind_flags(mounts: &[MountSpec]) -> String {
    let flags: Vec<String> = mounts
        .iter()
        .map(|m| {
            let flag = if m.readonly { "--bind-ro" } else { "--bind" };
            format!("{flag}={}:{}", m.host.display(), m.container)
        })
        .collect();
    format!("EXTRA_NSPAWN_FLAGS=\"{}\"\n", flags.join(" "))
}

/// Wraps `argv` so it runs with the requested working directory and env.
fn wrap_argv(argv: &[String], opts: &ExecOptions) -> Vec<String> {
    let mut wrapped = Vec::new();
    if !opts.env.is_empty() {
        wrapped.push("env".to_string());
        wrapped.extend(opts.env.iter().map(|(k, v)| format!("{k}={v}")));
    }
    if let Some(ref dir) = opts.workdir {
        wrapped.extend([
            "sh".to_string(),
            "-c".to_string(),
            format!("cd {} && exec \"$@\"", shell_words::quote(dir)),
            "sh".to_string(),
        ]);
    }
    wrapped.extend(argv.iter().cloned());
    wrapped
}

fn append_conf(path: &Path, line: &str) -> RuntimeResult<()> {
    use std::io::Write;
    let mut file = std::fs::OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| RuntimeError::command_failed(format!("open {}: {e}", path.display())))?;
    file.write_all(line.as_bytes())
        .map_err(|e| RuntimeError::command_failed(format!("write {}: {e}", path.display())))
}

#[async_trait]
impl Runtime for NixosContainerRuntime {
    fn kind(&self) -> BackendKind {
        BackendKind::NixosContainer
    }

    async fn create(&self, opts: &CreateOptions) -> RuntimeResult<()> {
        let nix_file =
            std::env::temp_dir().join(format!("corral-{}-{}.nix", opts.sandbox, uuid::Uuid::new_v4()));
        std::fs::write(&nix_file, render_nix(&opts.spec)).map_err(|e| {
            RuntimeError::command_failed(format!("write {}: {e}", nix_file.display()))
        })?;

        let host = opts.spec.network.host_address.to_string();
        let guest = opts.spec.network.guest_address.to_string();
        let nix_path = nix_file.to_string_lossy().into_owned();
        debug!(container = %opts.container, "Creating nixos container");
        let created = run(&[
            "create",
            &opts.container,
            "--config-file",
            &nix_path,
            "--host-address",
            &host,
            "--local-address",
            &guest,
        ])
        .await;
        let _ = std::fs::remove_file(&nix_file);
        created?;

        let conf = self.conf_file(&opts.container);
        append_conf(&conf, &nspawn_bind_flags(&opts.spec.mounts))?;
        append_conf(&conf, &format!("{SANDBOX_MARKER}={}\n", opts.sandbox))?;

        if opts.start {
            self.start(&opts.container).await?;
        }
        info!(container = %opts.container, started = opts.start, "Container created");
        Ok(())
    }

    async fn start(&self, name: &str) -> RuntimeResult<()> {
        run(&["start", name]).await.map(|_| ())
    }

    async fn stop(&self, name: &str) -> RuntimeResult<()> {
        run(&["stop", name]).await.map(|_| ())
    }

    async fn destroy(&self, name: &str) -> RuntimeResult<()> {
        if !self.list_names().await?.iter().any(|n| n == name) {
            debug!(container = %name, "Container already gone");
            return Ok(());
        }
        run(&["destroy", name]).await.map(|_| ())
    }

    async fn status(&self, name: &str) -> RuntimeResult<ContainerInfo> {
        if !self.list_names().await?.iter().any(|n| n == name) {
            return Ok(ContainerInfo::not_found(name));
        }
        let output = run(&["status", name]).await?;
        let up = String::from_utf8_lossy(&output.stdout).trim() == "up";
        Ok(ContainerInfo {
            name: name.to_string(),
            sandbox: None,
            status: if up {
                ContainerStatus::Running
            } else {
                ContainerStatus::Stopped
            },
            created_at: None,
            started_at: None,
        })
    }

    async fn exec(
        &self,
        name: &str,
        argv: &[String],
        opts: &ExecOptions,
    ) -> RuntimeResult<ExecOutput> {
        let mut cmd = Command::new(TOOL);
        cmd.args(["run", name, "--"])
            .args(wrap_argv(argv, opts))
            .stdin(if opts.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| RuntimeError::unavailable(format!("failed to run {TOOL}: {e}")))?;
        if let (Some(bytes), Some(mut stdin)) = (opts.stdin.as_ref(), child.stdin.take()) {
            stdin
                .write_all(bytes)
                .await
                .map_err(|e| RuntimeError::command_failed(format!("exec stdin: {e}")))?;
        }
        let output = child
            .wait_with_output()
            .await
            .map_err(|e| RuntimeError::command_failed(format!("exec {name}: {e}")))?;

        Ok(ExecOutput {
            exit_code: i64::from(output.status.code().unwrap_or(-1)),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn exec_interactive(&self, name: &str, argv: &[String]) -> RuntimeResult<i32> {
        let status = Command::new(TOOL)
            .args(["run", name, "--"])
            .args(argv)
            .status()
            .await
            .map_err(|e| RuntimeError::unavailable(format!("failed to run {TOOL}: {e}")))?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn list(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        let mut infos = Vec::new();
        for name in self.list_names().await? {
            if !BackendKind::NixosContainer.owns_container_name("", &name) {
                continue;
            }
            let Some(sandbox) = self.sandbox_of(&name) else {
                debug!(container = %name, "Skipping container without corral marker");
                continue;
            };
            let mut info = self.status(&name).await?;
            info.sandbox = Some(sandbox);
            infos.push(info);
        }
        Ok(infos)
    }
}

impl NixosContainerRuntime {
    async fn list_names(&self) -> RuntimeResult<Vec<String>> {
        let output = run(&["list"]).await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect())
    }
}
