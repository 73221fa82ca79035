//! cheqd-installer - provision or upgrade a cheqd-node host
//!
//! Exit codes: 0 success, 1 a phase failed, 77 not root, 78 configuration
//! rejected, 130 interrupted.

use anyhow::{Context, Result};
use cheqd_installer::release::{Platform, ReleaseFeed};
use cheqd_installer::{Host, Orchestrator, PlannedPhase, ProvisionReport};
use clap::{Args, Parser, Subcommand};
use installer_common::{
    Chain, Configuration, HttpRemote, InstallMode, Journal, StatvfsSpace, SystemExecutor,
    EXIT_CONFIG_INVALID, EXIT_INTERRUPTED, EXIT_NOT_ROOT, EXIT_PHASE_FAILED, EXIT_SUCCESS,
    LAST_N_RELEASES,
};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cheqd-installer")]
#[command(about = "Install or upgrade cheqd-node on this host", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (default /etc/cheqd-installer/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every provisioning phase
    Install(Overrides),

    /// Show which phases would run, without touching the host
    Plan(Overrides),

    /// List the latest release and the ones before it
    Releases,
}

/// Command-line overrides of the configuration file
#[derive(Args, Default)]
struct Overrides {
    /// Release tag to install (default: latest)
    #[arg(long)]
    release: Option<String>,

    /// Service account home directory
    #[arg(long)]
    home: Option<PathBuf>,

    /// mainnet or testnet
    #[arg(long)]
    chain: Option<Chain>,

    /// Run the daemon under cosmovisor
    #[arg(long, conflicts_with = "standalone")]
    supervised: bool,

    /// Run the daemon directly
    #[arg(long)]
    standalone: bool,

    /// Upgrade the existing installation in place
    #[arg(long, conflicts_with = "fresh")]
    upgrade: bool,

    /// Remove existing configuration and data first
    #[arg(long)]
    fresh: bool,

    /// Bootstrap chain data from the newest snapshot
    #[arg(long, conflicts_with = "no_snapshot")]
    snapshot: bool,

    #[arg(long)]
    no_snapshot: bool,

    /// Initialise and configure a new node
    #[arg(long)]
    setup: bool,
}

impl Overrides {
    fn apply(&self, config: &mut Configuration) {
        if let Some(release) = &self.release {
            config.release = Some(release.clone());
        }
        if let Some(home) = &self.home {
            config.home_dir = home.clone();
        }
        if let Some(chain) = self.chain {
            config.chain = chain;
        }
        if self.supervised {
            config.mode = InstallMode::Supervised;
        }
        if self.standalone {
            config.mode = InstallMode::Standalone;
        }
        if self.upgrade {
            config.upgrade = true;
        }
        if self.fresh {
            config.fresh_install = true;
        }
        if self.snapshot {
            config.init_from_snapshot = true;
        }
        if self.no_snapshot {
            config.init_from_snapshot = false;
        }
        if self.setup {
            config.new_setup = true;
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn is_root() -> bool {
    nix::unistd::Uid::effective().is_root()
}

fn load_config(path: Option<&PathBuf>, overrides: &Overrides) -> installer_common::Result<Configuration> {
    let mut config = match path {
        Some(path) => Configuration::load(path)?,
        None => Configuration::load_default()?,
    };
    overrides.apply(&mut config);
    config.validate()?;
    Ok(config)
}

fn print_plan(plan: &[PlannedPhase]) {
    println!();
    for planned in plan {
        let marker = if planned.runs {
            "[run] ".green().to_string()
        } else {
            "[skip]".yellow().to_string()
        };
        println!("  {} {:<16} {}", marker, planned.phase.as_str(), planned.reason);
    }
    println!();
}

fn print_report(config: &Configuration, report: &ProvisionReport) {
    println!();
    for outcome in &report.outcomes {
        let marker = if outcome.change.applied() {
            "[OK]".bright_green().to_string()
        } else {
            "[--]".dimmed().to_string()
        };
        println!("  {} {:<16} {}", marker, outcome.phase.as_str(), outcome.details);
    }
    for skipped in &report.skipped {
        println!(
            "  {} {:<16} {}",
            "[SKIP]".yellow(),
            skipped.phase.as_str(),
            skipped.reason
        );
    }
    println!();
    println!(
        "{} {} {} installed for {} ({} mode)",
        "[DONE]".bright_green(),
        config.binary_name,
        report.release.as_deref().unwrap_or("?"),
        config.chain,
        config.mode
    );
}

fn run(cli: Cli) -> Result<i32> {
    let no_overrides = Overrides::default();
    let overrides = match &cli.command {
        Commands::Install(o) | Commands::Plan(o) => o,
        Commands::Releases => &no_overrides,
    };
    let config = match load_config(cli.config.as_ref(), overrides) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return Ok(EXIT_CONFIG_INVALID);
        }
    };

    let exec = SystemExecutor;
    let remote = HttpRemote::new().context("building HTTP client")?;
    let space = StatvfsSpace;
    let host = Host::new(&exec, &remote, &space);

    match cli.command {
        Commands::Releases => {
            let candidates = ReleaseFeed::new(host, &config.sources)
                .candidates(LAST_N_RELEASES)
                .context("fetching releases")?;
            println!();
            for (i, release) in candidates.iter().enumerate() {
                let label = if i == 0 {
                    format!("{} (latest)", release)
                } else {
                    release.to_string()
                };
                println!("  {}) {}", i + 1, label);
            }
            println!();
            Ok(EXIT_SUCCESS)
        }
        Commands::Plan(_) => {
            let journal = Journal::disabled();
            let orchestrator = Orchestrator::new(host, &config, &journal, Platform::current());
            print_plan(&orchestrator.plan());
            Ok(EXIT_SUCCESS)
        }
        Commands::Install(_) => {
            if !is_root() {
                eprintln!("{} cheqd-installer must run as root", "[ERROR]".bright_red());
                return Ok(EXIT_NOT_ROOT);
            }

            ctrlc::set_handler(|| {
                eprintln!("\nInterrupted; re-run the installer to resume");
                std::process::exit(EXIT_INTERRUPTED);
            })
            .context("installing interrupt handler")?;

            let journal = Journal::open(&config.paths.journal_file);
            info!(
                "Installing {} on {} ({} mode{})",
                config.binary_name,
                config.chain,
                config.mode,
                if config.upgrade { ", upgrade" } else { "" }
            );
            let orchestrator = Orchestrator::new(host, &config, &journal, Platform::current());
            match orchestrator.run() {
                Ok(report) => {
                    print_report(&config, &report);
                    Ok(EXIT_SUCCESS)
                }
                Err(failure) => {
                    eprintln!("{} {}", "[FAILED]".bright_red(), failure);
                    eprintln!(
                        "Validator state backups are in {}",
                        orchestrator.layout().backup.display()
                    );
                    Ok(failure.exit_code())
                }
            }
        }
    }
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            EXIT_PHASE_FAILED
        }
    };
    std::process::exit(code);
}
