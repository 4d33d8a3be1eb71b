//! List sandboxes and show one in detail.

use anyhow::{Context, Result};
use chrono::Utc;
use colored::Colorize;
use std::sync::Arc;
use tracing::warn;

use super::format::{format_ps, format_status, PsRow};
use crate::allocator::SlotAddresses;
use crate::context::AppContext;
use crate::generator::ContainerSpec;
use crate::permissions::PermissionOverlay;
use crate::runtime::Runtime;

/// The runtime if it answers; listings degrade to "unknown" status otherwise.
async fn optional_runtime(ctx: &AppContext) -> Option<Arc<dyn Runtime>> {
    match ctx.runtime().await {
        Ok(runtime) => Some(runtime),
        Err(e) => {
            warn!(error = %e, "Container status unavailable");
            None
        }
    }
}

pub async fn list(ctx: &AppContext) -> Result<()> {
    let listing = ctx.store.list().context("Failed to read sandbox records")?;
    let runtime = if listing.records.is_empty() {
        None
    } else {
        optional_runtime(ctx).await
    };

    let mut rows = Vec::with_capacity(listing.records.len());
    for record in &listing.records {
        let container = match &runtime {
            Some(rt) => rt
                .status(&ctx.container_name(rt.as_ref(), record))
                .await
                .ok(),
            None => None,
        };
        rows.push(PsRow {
            name: record.name.clone(),
            template: record.template.clone(),
            slot: record.network_slot,
            mode: record.workspace_mode.to_string(),
            container,
        });
    }

    print!("{}", format_ps(&rows, Utc::now()));
    for (name, e) in &listing.invalid {
        eprintln!("{} {name}: {e}", "⚠".yellow());
    }
    Ok(())
}

pub async fn status(ctx: &AppContext, name: &str) -> Result<()> {
    let record = ctx.store.load(name)?;
    let addresses = SlotAddresses::new(&ctx.config.network.subnet_prefix, record.network_slot)?;

    let (container, info) = match optional_runtime(ctx).await {
        Some(rt) => {
            let container = ctx.container_name(rt.as_ref(), &record);
            let info = rt.status(&container).await.ok();
            (container, info)
        }
        None => (
            record
                .resolved_container_name
                .clone()
                .unwrap_or_else(|| record.name.clone()),
            None,
        ),
    };

    // The overlay if one was set, else what the generated config says.
    let policy = match PermissionOverlay::load(&ctx.layout.permissions_file(name))? {
        Some(overlay) => Some(overlay),
        None => ContainerSpec::load(&ctx.layout.config_file(name))
            .ok()
            .map(|spec| PermissionOverlay {
                network: spec.network.policy,
                allowed_domains: spec.network.allowed_domains,
            }),
    };

    print!(
        "{}",
        format_status(
            &record,
            &container,
            info.as_ref(),
            &addresses,
            policy.as_ref(),
            Utc::now()
        )
    );
    Ok(())
}
