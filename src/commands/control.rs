//! Start, stop and reset an existing sandbox.

use anyhow::{Context, Result};
use std::time::Duration;

use super::format::format_done;
use crate::context::AppContext;
use crate::lifecycle;

pub async fn start(ctx: &AppContext, name: &str) -> Result<()> {
    lifecycle::start(ctx, name)
        .await
        .with_context(|| format!("Failed to start sandbox '{name}'"))?;
    print!("{}", format_done("Started", name, &[]));
    Ok(())
}

/// Graceful stop with `timeout` seconds (or the configured default), hard
/// stop when `force`.
pub async fn stop(ctx: &AppContext, name: &str, force: bool, timeout: Option<u64>) -> Result<()> {
    let timeout = (!force).then(|| {
        timeout.map_or_else(|| ctx.config.lifecycle.stop_timeout(), Duration::from_secs)
    });
    lifecycle::stop(ctx, name, timeout)
        .await
        .with_context(|| format!("Failed to stop sandbox '{name}'"))?;
    print!("{}", format_done("Stopped", name, &[]));
    Ok(())
}

pub async fn reset(ctx: &AppContext, name: &str) -> Result<()> {
    let outcome = lifecycle::reset(ctx, name)
        .await
        .with_context(|| format!("Failed to reset sandbox '{name}'"))?;
    print!("{}", format_done("Reset", name, &outcome.warnings));
    Ok(())
}
