//! `corral`: provision, track and reconcile container sandboxes for agents.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod allocator;
mod audit;
mod commands;
mod config;
mod context;
mod error;
mod gc;
mod generator;
mod health;
mod layout;
mod lifecycle;
mod monitor;
mod names;
mod permissions;
mod runtime;
mod secrets;
mod store;
mod templates;
mod workspace;

use config::Config;
use context::AppContext;
use error::{exit_code_for, CorralError};
use lifecycle::CreateRequest;
use permissions::NetworkPolicy;
use workspace::WorkspaceMode;

#[derive(Parser)]
#[command(name = "corral")]
#[command(
    author,
    version,
    about = "Isolated, reconcilable sandboxes for autonomous agents"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: $CORRAL_CONFIG, then <config_dir>/corral/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create and start a sandbox
    Up {
        name: String,

        /// Template to build from (default: config's default_template)
        #[arg(short, long)]
        template: Option<String>,

        /// Workspace mode: direct, git or jj
        #[arg(short, long, default_value = "direct")]
        mode: WorkspaceMode,

        /// Directory to mount (direct) or source repository (git, jj).
        /// VCS modes default to the current directory.
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Destroy a sandbox and everything it owns
    Down {
        name: String,

        /// Skip the graceful stop
        #[arg(short, long)]
        force: bool,

        /// Seconds to wait for a graceful stop
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Start a stopped sandbox
    Start { name: String },

    /// Stop a running sandbox
    Stop {
        name: String,

        /// Stop immediately
        #[arg(short, long)]
        force: bool,

        /// Seconds to wait for a graceful stop
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Recreate a sandbox's container from its existing config
    Reset { name: String },

    /// Report (or with --force remove) state left behind by failed operations
    Gc {
        /// Remove the orphans instead of only listing them
        #[arg(long)]
        force: bool,
    },

    /// List sandboxes
    Ps,

    /// Show one sandbox in detail
    Status { name: String },

    /// Run a command in a sandbox
    Exec {
        name: String,

        /// Command and arguments, after `--`
        #[arg(last = true, required = true)]
        argv: Vec<String>,
    },

    /// Open an interactive shell in a sandbox
    Shell {
        name: String,

        /// Shell to launch inside the container
        #[arg(long, env = "CORRAL_SHELL", default_value = "bash")]
        shell: String,
    },

    /// Show a sandbox's container logs
    Logs {
        name: String,

        /// Only the last N lines
        #[arg(long)]
        tail: Option<usize>,
    },

    /// Change a sandbox's network policy (applied on next reset)
    Net {
        name: String,

        /// allow-all, allowlist or deny
        #[arg(long)]
        policy: NetworkPolicy,

        /// Domain to allow; repeatable. Defaults to common hosts for allowlist.
        #[arg(long = "allow")]
        allow: Vec<String>,
    },

    /// Watch sandbox health until Ctrl-C
    Monitor {
        /// Start sandboxes found stopped or unhealthy
        #[arg(long)]
        auto_restart: bool,

        /// Seconds between sweeps
        #[arg(long)]
        interval: Option<u64>,
    },
}

/// Console logging plus, when `log_dir` is given, a daily JSON log file.
fn init_tracing(verbose: bool, log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("corral=debug")
        } else {
            EnvFilter::new("corral=info")
        }
    });

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "monitor.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .with(filter)
        .init();
    guard
}

async fn run(cli: Cli) -> Result<i32> {
    let config = Config::load(cli.config.as_deref())
        .map_err(|e| CorralError::config(format!("{e:#}")))?;
    let ctx = AppContext::from_config(config)?;

    let log_dir = matches!(cli.command, Commands::Monitor { .. }).then(|| ctx.layout.logs_dir());
    let _guard = init_tracing(cli.verbose, log_dir.as_deref());

    match cli.command {
        Commands::Up {
            name,
            template,
            mode,
            path,
        } => {
            let path = match path {
                None if mode.requires_vcs() => Some(
                    std::env::current_dir().context("Failed to get current directory")?,
                ),
                path => path,
            };
            let mut request = CreateRequest::new(name, mode, path);
            request.template = template;
            commands::up::run(&ctx, request).await?;
        }
        Commands::Down {
            name,
            force,
            timeout,
        } => {
            commands::down::run(&ctx, &name, force, timeout).await?;
        }
        Commands::Start { name } => {
            commands::control::start(&ctx, &name).await?;
        }
        Commands::Stop {
            name,
            force,
            timeout,
        } => {
            commands::control::stop(&ctx, &name, force, timeout).await?;
        }
        Commands::Reset { name } => {
            commands::control::reset(&ctx, &name).await?;
        }
        Commands::Gc { force } => {
            commands::gc::run(&ctx, force).await?;
        }
        Commands::Ps => {
            commands::ps::list(&ctx).await?;
        }
        Commands::Status { name } => {
            commands::ps::status(&ctx, &name).await?;
        }
        Commands::Exec { name, argv } => {
            return commands::exec::exec(&ctx, &name, &argv).await;
        }
        Commands::Shell { name, shell } => {
            return commands::exec::shell(&ctx, &name, &shell).await;
        }
        Commands::Logs { name, tail } => {
            commands::exec::logs(&ctx, &name, tail).await?;
        }
        Commands::Net {
            name,
            policy,
            allow,
        } => {
            commands::net::run(&ctx, &name, policy, allow).await?;
        }
        Commands::Monitor {
            auto_restart,
            interval,
        } => {
            commands::monitor::run(&ctx, auto_restart, interval).await?;
        }
    }

    Ok(0)
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(e) => {
            eprintln!("{} {e:#}", "Error:".red().bold());
            ExitCode::from(u8::try_from(exit_code_for(&e)).unwrap_or(1))
        }
    }
}
