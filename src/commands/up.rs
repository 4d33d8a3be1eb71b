//! Create a sandbox.

use anyhow::{Context, Result};

use super::format::format_created;
use crate::context::AppContext;
use crate::lifecycle::{self, CreateRequest};

pub async fn run(ctx: &AppContext, request: CreateRequest) -> Result<()> {
    let name = request.name.clone();
    let outcome = lifecycle::create(ctx, request)
        .await
        .with_context(|| format!("Failed to create sandbox '{name}'"))?;

    let record = &outcome.value;
    let container = record
        .resolved_container_name
        .as_deref()
        .unwrap_or(record.name.as_str());
    print!("{}", format_created(record, container, &outcome.warnings));
    Ok(())
}
