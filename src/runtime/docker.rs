//! Docker backend, driven through the daemon API via bollard.

use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogOutput, LogsOptions, RemoveContainerOptions, StartContainerOptions,
    StopContainerOptions, UploadToContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::ContainerStateStatusEnum;
use bollard::Docker;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use super::{
    BackendKind, ContainerInfo, ContainerStatus, CreateOptions, ExecOptions, ExecOutput,
    GracefulStop, LogViewer, Runtime, RuntimeError, RuntimeResult,
};
use crate::generator::{ContainerSpec, WORKSPACE_MOUNT};
use crate::permissions::NetworkPolicy;

/// Label marking containers corral manages.
pub(crate) const MANAGED_LABEL: &str = "corral.managed";

/// Label holding the owning sandbox name.
pub(crate) const SANDBOX_LABEL: &str = "corral.sandbox";

/// Runs sandboxes as Docker containers.
pub(crate) struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connects to the local daemon and checks it answers.
    pub async fn connect() -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::unavailable(format!("cannot connect to Docker: {e}")))?;
        docker
            .ping()
            .await
            .map_err(|e| RuntimeError::unavailable(format!("Docker daemon did not answer: {e}")))?;
        Ok(Self { docker })
    }
}

/// Translates a bollard error, keeping 404s distinguishable.
fn map_err(op: &str, name: &str, e: bollard::errors::Error) -> RuntimeError {
    match e {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RuntimeError::not_found(name),
        other => RuntimeError::command_failed(format!("{op} {name}: {other}")),
    }
}

fn is_not_found(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            ..
        }
    )
}

/// Docker answers 304 when the container is already in the requested state.
fn is_not_modified(e: &bollard::errors::Error) -> bool {
    matches!(
        e,
        bollard::errors::Error::DockerResponseServerError {
            status_code: 304,
            ..
        }
    )
}

fn parse_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        // Docker reports "0001-01-01T00:00:00Z" for never-started containers.
        .filter(|t| t.timestamp() > 0)
}

fn status_from_state(status: Option<ContainerStateStatusEnum>) -> ContainerStatus {
    match status {
        Some(
            ContainerStateStatusEnum::RUNNING
            | ContainerStateStatusEnum::PAUSED
            | ContainerStateStatusEnum::RESTARTING,
        ) => ContainerStatus::Running,
        _ => ContainerStatus::Stopped,
    }
}

/// Expand ~ to home directory
fn expand_path(path: &Path) -> RuntimeResult<String> {
    let raw = path.to_string_lossy();
    if let Some(rest) = raw.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| RuntimeError::command_failed("Could not determine home directory"))?;
        Ok(home.join(rest).to_string_lossy().into_owned())
    } else {
        Ok(raw.into_owned())
    }
}

/// Parse memory limit string (e.g., "8g", "512m") to bytes
fn parse_memory_limit(limit: &str) -> RuntimeResult<i64> {
    let limit = limit.to_lowercase();
    let invalid = |_| RuntimeError::command_failed(format!("Invalid memory limit: {limit}"));

    if let Some(num) = limit.strip_suffix('g') {
        let gigs: i64 = num.parse().map_err(invalid)?;
        Ok(gigs * 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        let megs: i64 = num.parse().map_err(invalid)?;
        Ok(megs * 1024 * 1024)
    } else {
        limit.parse().map_err(invalid)
    }
}

#[allow(clippy::cast_possible_truncation)] // nano-CPUs fit in i64 for any real host
fn parse_cpus(cpus: &str) -> RuntimeResult<i64> {
    let count: f64 = cpus
        .parse()
        .map_err(|_| RuntimeError::command_failed(format!("Invalid CPU limit: {cpus}")))?;
    Ok((count * 1_000_000_000.0) as i64)
}

/// Translates a container spec into a Docker create request.
fn build_container_config(opts: &CreateOptions) -> RuntimeResult<ContainerConfig<String>> {
    let spec: &ContainerSpec = &opts.spec;

    let mut binds = Vec::with_capacity(spec.mounts.len());
    for mount in &spec.mounts {
        let mode = if mount.readonly { "ro" } else { "rw" };
        binds.push(format!("{}:{}:{mode}", expand_path(&mount.host)?, mount.container));
    }

    let memory = spec.memory.as_deref().map(parse_memory_limit).transpose()?;
    let nano_cpus = spec.cpus.as_deref().map(parse_cpus).transpose()?;

    let network_mode = match spec.network.policy {
        NetworkPolicy::Deny => Some("none".to_string()),
        NetworkPolicy::Allowlist => {
            warn!(
                container = %opts.container,
                "Allowlist enforcement needs the host firewall; Docker bridge allows all"
            );
            None
        }
        NetworkPolicy::AllowAll => None,
    };

    let labels = HashMap::from([
        (MANAGED_LABEL.to_string(), "true".to_string()),
        (SANDBOX_LABEL.to_string(), opts.sandbox.clone()),
        ("corral.slot".to_string(), spec.network.slot.to_string()),
        ("corral.template".to_string(), spec.template.clone()),
    ]);

    Ok(ContainerConfig {
        image: Some(spec.image.clone()),
        hostname: Some(opts.sandbox.clone()),
        working_dir: Some(WORKSPACE_MOUNT.to_string()),
        env: Some(spec.env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
        labels: Some(labels),
        cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
        host_config: Some(bollard::service::HostConfig {
            binds: Some(binds),
            memory,
            nano_cpus,
            network_mode,
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// Single-file tar archive for `upload_to_container`.
fn tar_single_file(file_name: &str, content: &[u8]) -> std::io::Result<Bytes> {
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();

    let mut builder = tar::Builder::new(Vec::new());
    builder.append_data(&mut header, file_name, content)?;
    Ok(Bytes::from(builder.into_inner()?))
}

#[async_trait]
impl Runtime for DockerRuntime {
    fn kind(&self) -> BackendKind {
        BackendKind::Docker
    }

    async fn create(&self, opts: &CreateOptions) -> RuntimeResult<()> {
        let config = build_container_config(opts)?;

        debug!(container = %opts.container, image = %opts.spec.image, "Creating container");
        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: opts.container.clone(),
                    platform: None,
                }),
                config,
            )
            .await
            .map_err(|e| map_err("create", &opts.container, e))?;

        if opts.start {
            self.start(&opts.container).await?;
        }
        info!(container = %opts.container, started = opts.start, "Container created");
        Ok(())
    }

    async fn start(&self, name: &str) -> RuntimeResult<()> {
        match self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_not_modified(&e) => {
                debug!(container = %name, "Container already running");
                Ok(())
            }
            Err(e) => Err(map_err("start", name, e)),
        }
    }

    async fn stop(&self, name: &str) -> RuntimeResult<()> {
        self.docker
            .stop_container(name, None)
            .await
            .map_err(|e| map_err("stop", name, e))
    }

    async fn destroy(&self, name: &str) -> RuntimeResult<()> {
        let result = self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if is_not_found(&e) => {
                debug!(container = %name, "Container already gone");
                Ok(())
            }
            Err(e) => Err(map_err("destroy", name, e)),
        }
    }

    async fn status(&self, name: &str) -> RuntimeResult<ContainerInfo> {
        let inspect = match self
            .docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
        {
            Ok(inspect) => inspect,
            Err(e) if is_not_found(&e) => return Ok(ContainerInfo::not_found(name)),
            Err(e) => return Err(map_err("inspect", name, e)),
        };

        let state = inspect.state.unwrap_or_default();
        let sandbox = inspect
            .config
            .and_then(|c| c.labels)
            .and_then(|mut labels| labels.remove(SANDBOX_LABEL));
        Ok(ContainerInfo {
            name: name.to_string(),
            sandbox,
            status: status_from_state(state.status),
            created_at: parse_timestamp(inspect.created.as_deref()),
            started_at: parse_timestamp(state.started_at.as_deref()),
        })
    }

    async fn exec(
        &self,
        name: &str,
        argv: &[String],
        opts: &ExecOptions,
    ) -> RuntimeResult<ExecOutput> {
        let env: Vec<String> = opts.env.iter().map(|(k, v)| format!("{k}={v}")).collect();
        let created = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(argv.to_vec()),
                    attach_stdin: Some(opts.stdin.is_some()),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: opts.workdir.clone(),
                    env: (!env.is_empty()).then_some(env),
                    ..Default::default()
                },
            )
            .await
            .map_err(|e| map_err("exec", name, e))?;

        let mut stdout = String::new();
        let mut stderr = String::new();

        match self
            .docker
            .start_exec(&created.id, None)
            .await
            .map_err(|e| map_err("exec", name, e))?
        {
            StartExecResults::Attached {
                mut output,
                mut input,
            } => {
                if let Some(ref bytes) = opts.stdin {
                    input
                        .write_all(bytes)
                        .await
                        .map_err(|e| RuntimeError::command_failed(format!("exec stdin: {e}")))?;
                    input
                        .shutdown()
                        .await
                        .map_err(|e| RuntimeError::command_failed(format!("exec stdin: {e}")))?;
                }
                while let Some(chunk) = output.next().await {
                    match chunk {
                        Ok(LogOutput::StdOut { message }) => {
                            stdout.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(LogOutput::StdErr { message }) => {
                            stderr.push_str(&String::from_utf8_lossy(&message));
                        }
                        Ok(_) => {}
                        Err(e) => warn!(container = %name, error = %e, "Error reading exec output"),
                    }
                }
            }
            StartExecResults::Detached => {
                warn!(container = %name, "exec started detached unexpectedly");
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&created.id)
            .await
            .map_err(|e| map_err("exec", name, e))?;

        Ok(ExecOutput {
            exit_code: inspect.exit_code.unwrap_or(-1),
            stdout,
            stderr,
        })
    }

    async fn exec_interactive(&self, name: &str, argv: &[String]) -> RuntimeResult<i32> {
        let status = tokio::process::Command::new("docker")
            .args(["exec", "-it", name])
            .args(argv)
            .status()
            .await
            .map_err(|e| RuntimeError::unavailable(format!("failed to run docker CLI: {e}")))?;
        Ok(status.code().unwrap_or(-1))
    }

    async fn list(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        let filters = HashMap::from([(
            "label".to_string(),
            vec![format!("{MANAGED_LABEL}=true")],
        )]);
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters,
                ..Default::default()
            }))
            .await
            .map_err(|e| map_err("list", "containers", e))?;

        Ok(summaries
            .into_iter()
            .filter_map(|summary| {
                let name = summary
                    .names
                    .as_ref()
                    .and_then(|names| names.first())
                    .map(|n| n.trim_start_matches('/').to_string())?;
                let running = summary.state.as_deref() == Some("running");
                Some(ContainerInfo {
                    sandbox: summary
                        .labels
                        .and_then(|mut labels| labels.remove(SANDBOX_LABEL)),
                    status: if running {
                        ContainerStatus::Running
                    } else {
                        ContainerStatus::Stopped
                    },
                    created_at: summary
                        .created
                        .and_then(|secs| DateTime::from_timestamp(secs, 0)),
                    started_at: None,
                    name,
                })
            })
            .collect())
    }

    async fn write_file(&self, name: &str, path: &str, content: &[u8]) -> RuntimeResult<()> {
        let path = Path::new(path);
        let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
            return Err(RuntimeError::command_failed(format!(
                "invalid target path: {}",
                path.display()
            )));
        };
        let dir = dir.to_string_lossy().into_owned();

        // The target directory may not exist yet; upload does not create it.
        let mkdir = vec!["mkdir".to_string(), "-p".to_string(), dir.clone()];
        let made = self.exec(name, &mkdir, &ExecOptions::default()).await?;
        if !made.success() {
            return Err(RuntimeError::command_failed(format!(
                "mkdir {dir}: {}",
                made.stderr.trim()
            )));
        }

        let archive = tar_single_file(&file_name.to_string_lossy(), content)
            .map_err(|e| RuntimeError::command_failed(format!("build archive: {e}")))?;
        self.docker
            .upload_to_container(
                name,
                Some(UploadToContainerOptions {
                    path: dir,
                    ..Default::default()
                }),
                archive,
            )
            .await
            .map_err(|e| map_err("upload", name, e))
    }

    fn graceful_stop(&self) -> Option<&dyn GracefulStop> {
        Some(self)
    }

    fn log_viewer(&self) -> Option<&dyn LogViewer> {
        Some(self)
    }
}

#[async_trait]
impl GracefulStop for DockerRuntime {
    async fn stop_with_timeout(&self, name: &str, timeout: Duration) -> RuntimeResult<()> {
        let t = i64::try_from(timeout.as_secs()).unwrap_or(i64::MAX);
        self.docker
            .stop_container(name, Some(StopContainerOptions { t }))
            .await
            .map_err(|e| map_err("stop", name, e))
    }
}

#[async_trait]
impl LogViewer for DockerRuntime {
    async fn logs(&self, name: &str, tail: Option<usize>) -> RuntimeResult<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.map_or_else(|| "all".to_string(), |t| t.to_string()),
            ..Default::default()
        };

        let mut stream = self.docker.logs(name, Some(options));
        let mut output = String::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| map_err("logs", name, e))?;
            output.push_str(&chunk.to_string());
        }
        Ok(output)
    }
}
