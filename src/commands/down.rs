//! Destroy a sandbox.

use anyhow::{Context, Result};
use std::time::Duration;

use super::format::format_done;
use crate::context::AppContext;
use crate::lifecycle::{self, DestroyOptions};

/// Stops gracefully first unless `force`; `timeout` overrides the configured
/// stop timeout.
pub async fn run(ctx: &AppContext, name: &str, force: bool, timeout: Option<u64>) -> Result<()> {
    let graceful = (!force).then(|| {
        timeout.map_or_else(|| ctx.config.lifecycle.stop_timeout(), Duration::from_secs)
    });
    let outcome = lifecycle::destroy(ctx, name, DestroyOptions { graceful })
        .await
        .with_context(|| format!("Failed to destroy sandbox '{name}'"))?;

    print!("{}", format_done("Destroyed", name, &outcome.warnings));
    Ok(())
}
