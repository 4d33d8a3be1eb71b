//! Run commands in a sandbox and read its logs.

use anyhow::{Context, Result};
use std::io::Write;
use std::sync::Arc;

use crate::context::AppContext;
use crate::error::CorralError;
use crate::generator::WORKSPACE_MOUNT;
use crate::runtime::{ContainerStatus, ExecOptions, Runtime, RuntimeError};

/// Resolves `name` to a container that must exist, and be running when
/// `need_running`.
async fn container(
    ctx: &AppContext,
    name: &str,
    need_running: bool,
) -> Result<(Arc<dyn Runtime>, String), CorralError> {
    let record = ctx.store.load(name)?;
    let runtime = ctx.runtime().await?;
    let container = ctx.container_name(runtime.as_ref(), &record);
    let info = runtime
        .status(&container)
        .await
        .map_err(|e| CorralError::backend("status", e))?;
    match info.status {
        ContainerStatus::NotFound => Err(CorralError::container_not_found(container)),
        ContainerStatus::Stopped if need_running => Err(CorralError::not_running(name)),
        _ => Ok((runtime, container)),
    }
}

fn exit_code(code: i64) -> i32 {
    i32::try_from(code).unwrap_or(1)
}

/// Runs `argv` in the workspace and relays its output. Returns the command's
/// exit code.
pub async fn exec(ctx: &AppContext, name: &str, argv: &[String]) -> Result<i32> {
    let (runtime, container) = container(ctx, name, true).await?;
    let options = ExecOptions {
        workdir: Some(WORKSPACE_MOUNT.to_string()),
        ..ExecOptions::default()
    };
    let output = runtime
        .exec(&container, argv, &options)
        .await
        .map_err(|e| match e {
            RuntimeError::NotFound { .. } => CorralError::container_not_found(&container),
            e => CorralError::backend("exec", e),
        })?;

    std::io::stdout()
        .write_all(output.stdout.as_bytes())
        .context("Failed to write output")?;
    std::io::stderr()
        .write_all(output.stderr.as_bytes())
        .context("Failed to write output")?;
    Ok(exit_code(output.exit_code))
}

/// Attaches an interactive shell. Returns the shell's exit code.
pub async fn shell(ctx: &AppContext, name: &str, shell: &str) -> Result<i32> {
    let (runtime, container) = container(ctx, name, true).await?;
    let argv = vec![shell.to_string()];
    let code = runtime
        .exec_interactive(&container, &argv)
        .await
        .map_err(|e| CorralError::backend("shell", e))?;
    Ok(code)
}

pub async fn logs(ctx: &AppContext, name: &str, tail: Option<usize>) -> Result<()> {
    let (runtime, container) = container(ctx, name, false).await?;
    let viewer = runtime.log_viewer().ok_or_else(|| {
        CorralError::backend(
            "logs",
            RuntimeError::unsupported(runtime.kind().as_str(), "log viewing"),
        )
    })?;
    let text = viewer
        .logs(&container, tail)
        .await
        .map_err(|e| CorralError::backend("logs", e))?;
    print!("{text}");
    Ok(())
}
