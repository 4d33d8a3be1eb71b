//! Change a sandbox's network policy.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::context::AppContext;
use crate::lifecycle;
use crate::permissions::{NetworkPolicy, PermissionOverlay};

pub async fn run(
    ctx: &AppContext,
    name: &str,
    policy: NetworkPolicy,
    allow: Vec<String>,
) -> Result<()> {
    let overlay = PermissionOverlay::new(policy, allow);
    lifecycle::reconfigure(ctx, name, overlay.clone())
        .await
        .with_context(|| format!("Failed to reconfigure sandbox '{name}'"))?;

    println!(
        "{} Network policy for {} set to {}",
        "✓".green(),
        name.cyan(),
        overlay.network.to_string().cyan()
    );
    if overlay.network == NetworkPolicy::Allowlist {
        println!("  Allowed: {}", overlay.allowed_domains.join(", "));
    }
    println!(
        "  Run {} to apply it.",
        format!("corral reset {name}").green()
    );
    Ok(())
}
