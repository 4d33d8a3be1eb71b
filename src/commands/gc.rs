//! Find and optionally remove orphaned sandbox state.

use anyhow::{Context, Result};

use super::format::format_gc;
use crate::context::AppContext;
use crate::gc;

pub async fn run(ctx: &AppContext, force: bool) -> Result<()> {
    let outcome = gc::run(ctx, force)
        .await
        .context("Failed to reconcile sandbox state")?;
    print!("{}", format_gc(&outcome.value, &outcome.warnings));
    Ok(())
}
