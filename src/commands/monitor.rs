//! Run the health monitor in the foreground until Ctrl-C.

use anyhow::Result;
use chrono::Utc;
use colored::Colorize;
use std::time::Duration;
use tokio::sync::watch;

use super::format::format_sweep;
use crate::context::AppContext;
use crate::monitor::{HealthMonitor, MonitorOutcome};

pub async fn run(ctx: &AppContext, auto_restart: bool, interval: Option<u64>) -> Result<()> {
    // Fail fast on a missing backend or a bad probe config.
    ctx.runtime().await?;
    ctx.health().await?;

    let mut monitor = HealthMonitor::new(ctx).on_sweep(|report| {
        println!("{}", format_sweep(report, Utc::now()));
    });
    if auto_restart {
        monitor = monitor.with_auto_restart(true);
    }
    let interval = interval.unwrap_or(ctx.config.monitor.interval_secs);
    monitor = monitor.with_interval(Duration::from_secs(interval));

    let (cancel, cancelled) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = cancel.send(true);
        }
    });

    println!(
        "{} Monitoring sandboxes every {}s{}. Press Ctrl-C to stop.",
        "ℹ".blue(),
        interval,
        if auto_restart || ctx.config.monitor.auto_restart {
            " with auto-restart"
        } else {
            ""
        }
    );
    let MonitorOutcome::Cancelled { sweeps } = monitor.run(cancelled).await;
    println!("{} Monitor stopped after {sweeps} sweeps.", "✓".green());
    Ok(())
}
