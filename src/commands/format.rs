//! Formatting for command output.
//!
//! Every function here is pure and returns a string; commands print.

use chrono::{DateTime, Duration, Utc};
use colored::Colorize;
use std::fmt::Write;

use crate::allocator::SlotAddresses;
use crate::gc::GcReport;
use crate::lifecycle::Warning;
use crate::monitor::{Health, SweepReport};
use crate::permissions::PermissionOverlay;
use crate::runtime::{ContainerInfo, ContainerStatus};
use crate::store::SandboxRecord;

/// One line of `corral ps`.
#[derive(Debug, Clone)]
pub(crate) struct PsRow {
    pub name: String,
    pub template: String,
    pub slot: u8,
    pub mode: String,
    /// `None` when the runtime could not be asked.
    pub container: Option<ContainerInfo>,
}

/// Formats a duration for display (e.g., "2h 5m 30s").
pub(crate) fn format_duration(duration: &Duration) -> String {
    let total_seconds = duration.num_seconds().max(0);
    let days = total_seconds / 86_400;
    let hours = (total_seconds % 86_400) / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if days > 0 {
        format!("{days}d {hours}h {minutes}m")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m {seconds}s")
    } else {
        format!("{seconds}s")
    }
}

fn status_label(info: Option<&ContainerInfo>) -> String {
    colour_status(plain_status(info), info)
}

/// Warnings collected by a best-effort operation, one per line.
pub(crate) fn format_warnings(warnings: &[Warning]) -> String {
    let mut out = String::new();
    for warning in warnings {
        writeln!(
            &mut out,
            "  {} {}",
            "⚠".yellow(),
            format!("{}: {}", warning.step, warning.message).yellow()
        )
        .unwrap();
    }
    out
}

pub(crate) fn format_created(record: &SandboxRecord, container: &str, warnings: &[Warning]) -> String {
    let mut out = String::new();
    writeln!(
        &mut out,
        "\n{} Created sandbox {}",
        "✓".green(),
        record.name.cyan().bold()
    )
    .unwrap();
    writeln!(&mut out, "  Container:  {}", container.cyan()).unwrap();
    writeln!(&mut out, "  Template:   {}", record.template.cyan()).unwrap();
    writeln!(&mut out, "  Slot:       {}", record.network_slot.to_string().cyan()).unwrap();
    writeln!(
        &mut out,
        "  Workspace:  {} ({})",
        record.workspace.display().to_string().cyan(),
        record.workspace_mode
    )
    .unwrap();
    out.push_str(&format_warnings(warnings));
    writeln!(
        &mut out,
        "  Run {} to open a shell.",
        format!("corral shell {}", record.name).green()
    )
    .unwrap();
    out
}

/// One-line result for an operation on a named sandbox, plus its warnings.
pub(crate) fn format_done(verb: &str, name: &str, warnings: &[Warning]) -> String {
    let mut out = String::new();
    writeln!(&mut out, "{} {verb} {}", "✓".green(), name.cyan()).unwrap();
    out.push_str(&format_warnings(warnings));
    out
}

pub(crate) fn format_ps(rows: &[PsRow], now: DateTime<Utc>) -> String {
    let mut out = String::new();
    if rows.is_empty() {
        writeln!(&mut out, "{} No sandboxes.", "ℹ".blue()).unwrap();
        writeln!(&mut out, "  Run {} to create one.", "corral up <name>".green()).unwrap();
        return out;
    }

    writeln!(
        &mut out,
        "{}",
        format!(
            "{:<24} {:<12} {:>4}  {:<7} {:<8} {}",
            "NAME", "TEMPLATE", "SLOT", "MODE", "STATUS", "UPTIME"
        )
        .dimmed()
    )
    .unwrap();
    for row in rows {
        let uptime = row
            .container
            .as_ref()
            .and_then(|c| c.uptime(now))
            .map_or_else(|| "-".to_string(), |d| format_duration(&d));
        // Pad before colouring so escape codes do not skew the columns.
        let status = format!("{:<8}", plain_status(row.container.as_ref()));
        writeln!(
            &mut out,
            "{:<24} {:<12} {:>4}  {:<7} {} {}",
            row.name,
            row.template,
            row.slot,
            row.mode,
            colour_status(&status, row.container.as_ref()),
            uptime
        )
        .unwrap();
    }
    out
}

fn plain_status(info: Option<&ContainerInfo>) -> &'static str {
    match info.map(|i| i.status) {
        Some(ContainerStatus::Running) => "running",
        Some(ContainerStatus::Stopped) => "stopped",
        Some(ContainerStatus::NotFound) => "missing",
        None => "unknown",
    }
}

fn colour_status(text: &str, info: Option<&ContainerInfo>) -> String {
    match info.map(|i| i.status) {
        Some(ContainerStatus::Running) => text.green().to_string(),
        Some(ContainerStatus::Stopped) => text.yellow().to_string(),
        Some(ContainerStatus::NotFound) => text.red().to_string(),
        None => text.dimmed().to_string(),
    }
}

/// Detailed view of one sandbox.
pub(crate) fn format_status(
    record: &SandboxRecord,
    container: &str,
    info: Option<&ContainerInfo>,
    addresses: &SlotAddresses,
    overlay: Option<&PermissionOverlay>,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    writeln!(&mut out, "\n{}", "━".repeat(50).dimmed()).unwrap();
    writeln!(&mut out, "{}", format!("   Sandbox {}", record.name).yellow().bold()).unwrap();
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();

    writeln!(&mut out, "  Status:     {}", status_label(info)).unwrap();
    writeln!(&mut out, "  Container:  {}", container.cyan()).unwrap();
    if let Some(backend) = &record.runtime_backend {
        writeln!(&mut out, "  Backend:    {}", backend.cyan()).unwrap();
    }
    writeln!(&mut out, "  Template:   {}", record.template.cyan()).unwrap();
    writeln!(
        &mut out,
        "  Network:    slot {} (host {}, sandbox {})",
        record.network_slot.to_string().cyan(),
        addresses.host,
        addresses.guest
    )
    .unwrap();
    if let Some(overlay) = overlay {
        writeln!(&mut out, "  Policy:     {}", overlay.network.to_string().cyan()).unwrap();
        if !overlay.allowed_domains.is_empty() {
            writeln!(&mut out, "  Allowed:    {}", overlay.allowed_domains.join(", ")).unwrap();
        }
    }
    writeln!(
        &mut out,
        "  Workspace:  {} ({})",
        record.workspace.display().to_string().cyan(),
        record.workspace_mode
    )
    .unwrap();
    if let Some(repo) = &record.source_repo {
        writeln!(&mut out, "  Source:     {}", repo.display().to_string().cyan()).unwrap();
    }
    writeln!(
        &mut out,
        "  Created:    {}",
        record
            .created_at
            .format("%Y-%m-%d %H:%M:%S UTC")
            .to_string()
            .cyan()
    )
    .unwrap();
    if let Some(uptime) = info.and_then(|i| i.uptime(now)) {
        writeln!(&mut out, "  Uptime:     {}", format_duration(&uptime).cyan()).unwrap();
    }
    writeln!(&mut out, "{}", "━".repeat(50).dimmed()).unwrap();
    out
}

fn format_names<'a>(out: &mut String, title: &str, names: impl IntoIterator<Item = &'a String>) {
    let names: Vec<&String> = names.into_iter().collect();
    if names.is_empty() {
        writeln!(out, "  {title}: {}", "none".dimmed()).unwrap();
        return;
    }
    writeln!(out, "  {title}:").unwrap();
    for name in names {
        writeln!(out, "    {} {name}", "✗".red()).unwrap();
    }
}

pub(crate) fn format_gc(report: &GcReport, warnings: &[Warning]) -> String {
    let mut out = String::new();
    if report.is_clean() {
        writeln!(&mut out, "{} Nothing to collect.", "✓".green()).unwrap();
    } else if report.forced {
        writeln!(&mut out, "{} Removed orphans:", "✓".green()).unwrap();
    } else {
        writeln!(&mut out, "{} Found orphans:", "ℹ".blue()).unwrap();
    }

    if !report.is_clean() {
        format_names(&mut out, "Orphaned on disk", &report.orphaned_on_disk);
        let containers: Vec<String> = report
            .orphaned_containers
            .iter()
            .map(|(name, container)| {
                if name == container {
                    name.clone()
                } else {
                    format!("{name} ({container})")
                }
            })
            .collect();
        format_names(&mut out, "Orphaned containers", &containers);
    }
    if !report.invalid_records.is_empty() {
        writeln!(
            &mut out,
            "  {} unreadable records: {}",
            "⚠".yellow(),
            report
                .invalid_records
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(", ")
        )
        .unwrap();
    }
    out.push_str(&format_warnings(warnings));
    if !report.forced && !report.is_clean() {
        writeln!(&mut out, "  Run {} to remove them.", "corral gc --force".green()).unwrap();
    }
    out
}

/// Summary line for an interactive monitor sweep.
pub(crate) fn format_sweep(report: &SweepReport, now: DateTime<Utc>) -> String {
    let mut out = String::new();
    write!(
        &mut out,
        "{} {} healthy, {} unhealthy, {} stopped, {} missing",
        now.format("%H:%M:%S").to_string().dimmed(),
        report.count(Health::Healthy).to_string().green(),
        report.count(Health::Unhealthy).to_string().red(),
        report.count(Health::Stopped).to_string().yellow(),
        report.count(Health::Missing).to_string().red(),
    )
    .unwrap();
    let restarted: Vec<&str> = report
        .observations
        .iter()
        .filter(|o| o.restarted)
        .map(|o| o.sandbox.as_str())
        .collect();
    if !restarted.is_empty() {
        write!(&mut out, "; restarted {}", restarted.join(", ").cyan()).unwrap();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitor::Observation;
    use crate::workspace::WorkspaceMode;
    use std::collections::{BTreeMap, BTreeSet};
    use std::net::Ipv4Addr;

    fn plain() {
        colored::control::set_override(false);
    }

    fn record() -> SandboxRecord {
        SandboxRecord {
            name: "alpha".into(),
            template: "rust".into(),
            workspace: "/src/alpha".into(),
            network_slot: 3,
            created_at: Utc::now(),
            workspace_mode: WorkspaceMode::Git,
            source_repo: Some("/src/repo".into()),
            resolved_container_name: Some("corral-alpha".into()),
            runtime_backend: Some("docker".into()),
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(&Duration::seconds(42)), "42s");
        assert_eq!(format_duration(&Duration::seconds(125)), "2m 5s");
        assert_eq!(format_duration(&Duration::seconds(7530)), "2h 5m 30s");
        assert_eq!(format_duration(&Duration::seconds(90_000)), "1d 1h 0m");
        assert_eq!(format_duration(&Duration::seconds(-5)), "0s");
    }

    #[test]
    fn test_format_warnings() {
        plain();
        let out = format_warnings(&[
            Warning::new("remove workspace", "locked"),
            Warning::new("inject docs", "exit 1"),
        ]);
        assert!(out.contains("remove workspace: locked"));
        assert_eq!(out.lines().count(), 2);
        assert!(format_warnings(&[]).is_empty());
    }

    #[test]
    fn test_format_created() {
        plain();
        let out = format_created(&record(), "corral-alpha", &[]);
        assert!(out.contains("Created sandbox alpha"));
        assert!(out.contains("corral-alpha"));
        assert!(out.contains("/src/alpha (git)"));
        assert!(out.contains("corral shell alpha"));
    }

    #[test]
    fn test_format_ps_empty() {
        plain();
        assert!(format_ps(&[], Utc::now()).contains("No sandboxes"));
    }

    #[test]
    fn test_format_ps_rows() {
        plain();
        let now = Utc::now();
        let running = ContainerInfo {
            name: "corral-alpha".into(),
            sandbox: Some("alpha".into()),
            status: ContainerStatus::Running,
            created_at: Some(now),
            started_at: Some(now - Duration::seconds(65)),
        };
        let rows = vec![
            PsRow {
                name: "alpha".into(),
                template: "rust".into(),
                slot: 1,
                mode: "git".into(),
                container: Some(running),
            },
            PsRow {
                name: "beta".into(),
                template: "default".into(),
                slot: 2,
                mode: "direct".into(),
                container: None,
            },
        ];
        let out = format_ps(&rows, now);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("NAME"));
        assert!(lines[1].contains("running") && lines[1].contains("1m 5s"));
        assert!(lines[2].contains("unknown") && lines[2].ends_with('-'));
    }

    #[test]
    fn test_format_status() {
        plain();
        let addresses = SlotAddresses {
            host: Ipv4Addr::new(10, 233, 3, 1),
            guest: Ipv4Addr::new(10, 233, 3, 2),
        };
        let overlay = PermissionOverlay::new(
            crate::permissions::NetworkPolicy::Allowlist,
            vec!["example.com".into()],
        );
        let out = format_status(
            &record(),
            "corral-alpha",
            Some(&ContainerInfo::not_found("corral-alpha")),
            &addresses,
            Some(&overlay),
            Utc::now(),
        );
        assert!(out.contains("Status:     missing"));
        assert!(out.contains("host 10.233.3.1, sandbox 10.233.3.2"));
        assert!(out.contains("Policy:     allowlist"));
        assert!(out.contains("example.com"));
        assert!(out.contains("Source:     /src/repo"));
        assert!(!out.contains("Uptime"));
    }

    #[test]
    fn test_format_gc() {
        plain();
        let report = GcReport {
            orphaned_on_disk: BTreeSet::from(["a".to_string()]),
            orphaned_containers: BTreeMap::from([("d".to_string(), "corral-d".to_string())]),
            ..GcReport::default()
        };
        let out = format_gc(&report, &[]);
        assert!(out.contains("Found orphans"));
        assert!(out.contains("✗ a"));
        assert!(out.contains("d (corral-d)"));
        assert!(out.contains("corral gc --force"));

        let clean = format_gc(&GcReport::default(), &[]);
        assert!(clean.contains("Nothing to collect"));
        assert!(!clean.contains("--force"));
    }

    #[test]
    fn test_format_sweep() {
        plain();
        let report = SweepReport {
            observations: vec![
                Observation {
                    sandbox: "a".into(),
                    container: "a".into(),
                    health: Health::Healthy,
                    session_active: false,
                    restarted: false,
                },
                Observation {
                    sandbox: "b".into(),
                    container: "b".into(),
                    health: Health::Stopped,
                    session_active: false,
                    restarted: true,
                },
            ],
            errors: Vec::new(),
        };
        let out = format_sweep(&report, Utc::now());
        assert!(out.contains("1 healthy, 0 unhealthy, 1 stopped, 0 missing"));
        assert!(out.ends_with("restarted b"));
    }
}
