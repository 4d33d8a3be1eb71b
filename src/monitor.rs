//! Timer-driven health monitor.
//!
//! One sweep looks at every sandbox record, classifies its container and, when
//! auto-restart is on, starts the ones that are stopped or unhealthy. Sweeps
//! never overlap: the next sleep only begins after a sweep returns.
//! Cancellation is checked between sweeps, never inside one.

use std::fmt;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::allocator::SlotAddresses;
use crate::audit::AuditKind;
use crate::context::AppContext;
use crate::error::CorralError;
use crate::runtime::{ContainerStatus, Runtime, RuntimeResult};

/// Health of one sandbox as seen by a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Health {
    /// Running and reachable
    Healthy,
    /// Running but not reachable
    Unhealthy,
    Stopped,
    /// Record exists, container does not
    Missing,
}

impl Health {
    fn wants_restart(self) -> bool {
        matches!(self, Self::Stopped | Self::Unhealthy)
    }
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Unhealthy => write!(f, "unhealthy"),
            Self::Stopped => write!(f, "stopped"),
            Self::Missing => write!(f, "missing"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Observation {
    pub sandbox: String,
    pub container: String,
    pub health: Health,
    pub session_active: bool,
    pub restarted: bool,
}

#[derive(Debug, Default)]
pub(crate) struct SweepReport {
    pub observations: Vec<Observation>,
    /// Sandboxes that could not be inspected this sweep.
    pub errors: Vec<(String, String)>,
}

impl SweepReport {
    pub fn count(&self, health: Health) -> usize {
        self.observations
            .iter()
            .filter(|o| o.health == health)
            .count()
    }
}

/// How [`HealthMonitor::run`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MonitorOutcome {
    Cancelled { sweeps: u64 },
}

pub(crate) struct HealthMonitor<'a> {
    ctx: &'a AppContext,
    interval: Duration,
    auto_restart: bool,
    log_observations: bool,
    on_sweep: Option<Box<dyn Fn(&SweepReport) + Send + Sync + 'a>>,
}

impl<'a> HealthMonitor<'a> {
    /// Monitor configured from the `[monitor]` section.
    pub fn new(ctx: &'a AppContext) -> Self {
        let config = &ctx.config.monitor;
        Self {
            ctx,
            interval: Duration::from_secs(config.interval_secs),
            auto_restart: config.auto_restart,
            log_observations: config.log_observations,
            on_sweep: None,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_auto_restart(mut self, auto_restart: bool) -> Self {
        self.auto_restart = auto_restart;
        self
    }

    /// Called with each successful sweep's report.
    pub fn on_sweep(mut self, f: impl Fn(&SweepReport) + Send + Sync + 'a) -> Self {
        self.on_sweep = Some(Box::new(f));
        self
    }

    /// Sweeps until `cancel` becomes true or its sender is dropped.
    ///
    /// A failed sweep is logged and the loop carries on.
    pub async fn run(&self, mut cancel: watch::Receiver<bool>) -> MonitorOutcome {
        let mut sweeps = 0;
        loop {
            if *cancel.borrow_and_update() {
                break;
            }

            match self.sweep().await {
                Ok(report) => {
                    info!(
                        event = "health_sweep",
                        sweep = sweeps + 1,
                        healthy = report.count(Health::Healthy),
                        unhealthy = report.count(Health::Unhealthy),
                        stopped = report.count(Health::Stopped),
                        missing = report.count(Health::Missing),
                        errors = report.errors.len(),
                    );
                    if let Some(f) = &self.on_sweep {
                        f(&report);
                    }
                }
                Err(e) => warn!(event = "health_sweep_failed", error = %e),
            }
            sweeps += 1;

            tokio::select! {
                () = tokio::time::sleep(self.interval) => {}
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!(event = "monitor_cancelled", sweeps);
        MonitorOutcome::Cancelled { sweeps }
    }

    /// Observes every sandbox once.
    pub async fn sweep(&self) -> Result<SweepReport, CorralError> {
        let runtime = self.ctx.runtime().await?;
        let checker = self.ctx.health().await?;
        let listing = self
            .ctx
            .store
            .list()
            .map_err(|e| CorralError::backend("scan records", e))?;

        let mut report = SweepReport::default();
        for (name, e) in listing.invalid {
            report.errors.push((name, e.to_string()));
        }

        for record in listing.records {
            let container = self.ctx.container_name(runtime.as_ref(), &record);
            let info = match runtime.status(&container).await {
                Ok(info) => info,
                Err(e) => {
                    warn!(sandbox = %record.name, error = %e, "Status check failed");
                    report.errors.push((record.name, e.to_string()));
                    continue;
                }
            };

            let mut session_active = false;
            let health = match info.status {
                ContainerStatus::NotFound => Health::Missing,
                ContainerStatus::Stopped => Health::Stopped,
                ContainerStatus::Running => {
                    session_active = checker.session_active(&container).await;
                    let address = SlotAddresses::new(
                        &self.ctx.config.network.subnet_prefix,
                        record.network_slot,
                    )?
                    .guest;
                    if checker.reachable(&container, address).await {
                        Health::Healthy
                    } else {
                        Health::Unhealthy
                    }
                }
            };

            let mut restarted = false;
            if self.auto_restart && health.wants_restart() {
                match restart(runtime.as_ref(), &container, health).await {
                    Ok(()) => {
                        restarted = true;
                        info!(event = "sandbox_restart", sandbox = %record.name, %health);
                        self.ctx
                            .audit
                            .log_event(AuditKind::Restart, &record.name, &health.to_string());
                    }
                    Err(e) => warn!(sandbox = %record.name, error = %e, "Restart failed"),
                }
            }

            if self.log_observations {
                info!(
                    event = "health_observation",
                    sandbox = %record.name,
                    %health,
                    session_active,
                    restarted,
                );
            } else {
                debug!(sandbox = %record.name, %health, "observed");
            }

            report.observations.push(Observation {
                sandbox: record.name,
                container,
                health,
                session_active,
                restarted,
            });
        }
        Ok(report)
    }
}

/// Brings a sandbox back up. A running but unhealthy container is stopped
/// first, since starting it again would be a no-op.
async fn restart(runtime: &dyn Runtime, container: &str, health: Health) -> RuntimeResult<()> {
    if health == Health::Unhealthy {
        runtime.stop(container).await?;
    }
    runtime.start(container).await
}
