//! Provisioning Orchestrator
//!
//! Runs the phases in a fixed order and stops at the first failure. Nothing
//! is rolled back: the host keeps whatever the failed phase left behind, and
//! the validator-state backup taken during pre-install is the recovery path.
//! Every phase checks before it mutates, so running again after a failure or
//! an interrupt picks up where the previous run stopped.

use crate::binary::{self, BinaryState};
use crate::release::{acquire_binary, Platform, Release, ReleaseFeed};
use crate::units::UnitManager;
use crate::{backup, environment, identity, node_config, snapshot, templates, Change, Host};
use chrono::NaiveDate;
use installer_common::fsutil::remove_path;
use installer_common::{
    Configuration, DirectoryLayout, InstallError, InstallLogEntry, InstallMode, Journal, COSMOVISOR_UNIT,
    MAX_SNAPSHOT_DAYS, STANDALONE_UNIT,
};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{error, info, warn};

/// Provisioning phases, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    PreInstall,
    AcquireBinary,
    ServiceAccount,
    DirectoryTree,
    InstallBinary,
    Environment,
    NodeConfig,
    DaemonUnit,
    LoggingUnits,
    Snapshot,
}

impl Phase {
    pub const ALL: [Phase; 10] = [
        Phase::PreInstall,
        Phase::AcquireBinary,
        Phase::ServiceAccount,
        Phase::DirectoryTree,
        Phase::InstallBinary,
        Phase::Environment,
        Phase::NodeConfig,
        Phase::DaemonUnit,
        Phase::LoggingUnits,
        Phase::Snapshot,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::PreInstall => "pre_install",
            Phase::AcquireBinary => "acquire_binary",
            Phase::ServiceAccount => "service_account",
            Phase::DirectoryTree => "directory_tree",
            Phase::InstallBinary => "install_binary",
            Phase::Environment => "environment",
            Phase::NodeConfig => "node_config",
            Phase::DaemonUnit => "daemon_unit",
            Phase::LoggingUnits => "logging_units",
            Phase::Snapshot => "snapshot",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a phase will run for a configuration, and why
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPhase {
    pub phase: Phase,
    pub runs: bool,
    pub reason: String,
}

impl PlannedPhase {
    fn run(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            runs: true,
            reason: reason.into(),
        }
    }

    fn skip(phase: Phase, reason: impl Into<String>) -> Self {
        Self {
            phase,
            runs: false,
            reason: reason.into(),
        }
    }
}

/// A phase that completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseOutcome {
    pub phase: Phase,
    pub change: Change,
    pub details: String,
}

/// The first failure of a run
#[derive(Error, Debug)]
#[error("phase {phase} failed: {source}")]
pub struct PhaseFailure {
    pub phase: Phase,
    #[source]
    pub source: InstallError,
}

impl PhaseFailure {
    pub fn exit_code(&self) -> i32 {
        self.source.exit_code()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProvisionReport {
    /// Tag of the installed release
    pub release: Option<String>,
    pub outcomes: Vec<PhaseOutcome>,
    pub skipped: Vec<PlannedPhase>,
}

impl ProvisionReport {
    pub fn outcome(&self, phase: Phase) -> Option<&PhaseOutcome> {
        self.outcomes.iter().find(|o| o.phase == phase)
    }
}

/// Carried from one phase to the next
#[derive(Default)]
struct RunState {
    release: Option<Release>,
    staged: Option<PathBuf>,
}

impl RunState {
    fn tag(&self) -> Option<&str> {
        self.release.as_ref().map(|r| r.tag_name.as_str())
    }
}

pub struct Orchestrator<'a> {
    host: Host<'a>,
    config: &'a Configuration,
    layout: DirectoryLayout,
    journal: &'a Journal,
    platform: Platform,
    today: NaiveDate,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        host: Host<'a>,
        config: &'a Configuration,
        journal: &'a Journal,
        platform: Platform,
    ) -> Self {
        Self {
            host,
            config,
            layout: DirectoryLayout::from_config(config),
            journal,
            platform,
            today: chrono::Local::now().date_naive(),
        }
    }

    /// Date snapshot discovery starts from
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn layout(&self) -> &DirectoryLayout {
        &self.layout
    }

    /// The other mode's daemon unit, when it is still installed
    fn switched_from(&self) -> Option<&'static str> {
        let config = self.config;
        let other = match config.mode {
            InstallMode::Supervised => STANDALONE_UNIT,
            InstallMode::Standalone => COSMOVISOR_UNIT,
        };
        (!config.fresh_install && config.paths.unit_file(other).exists()).then_some(other)
    }

    /// What `run` would do, without side effects
    pub fn plan(&self) -> Vec<PlannedPhase> {
        let config = self.config;
        Phase::ALL
            .iter()
            .map(|&phase| match phase {
                Phase::PreInstall if config.fresh_install => PlannedPhase::run(
                    phase,
                    "back up validator state, then remove units, binaries and the node root",
                ),
                Phase::PreInstall if self.switched_from().is_some() => PlannedPhase::run(
                    phase,
                    format!(
                        "back up validator state, then remove the {} installation",
                        self.config.mode.other()
                    ),
                ),
                Phase::PreInstall => PlannedPhase::run(phase, "back up validator state"),
                Phase::AcquireBinary => PlannedPhase::run(
                    phase,
                    match &config.release {
                        Some(tag) => format!("release {} for {}", tag, self.platform),
                        None => format!("latest release for {}", self.platform),
                    },
                ),
                Phase::ServiceAccount if config.upgrade => {
                    PlannedPhase::run(phase, format!("verify user {} (upgrade)", config.service_user))
                }
                Phase::ServiceAccount => {
                    PlannedPhase::run(phase, format!("create user {} if absent", config.service_user))
                }
                Phase::DirectoryTree => PlannedPhase::run(
                    phase,
                    format!("create missing directories under {}", self.layout.root.display()),
                ),
                Phase::InstallBinary => PlannedPhase::run(
                    phase,
                    format!("{} mode (currently {})", config.mode, binary::detect(config)),
                ),
                Phase::Environment => {
                    PlannedPhase::run(phase, config.paths.environment_file.display().to_string())
                }
                Phase::NodeConfig if config.new_setup => {
                    PlannedPhase::run(phase, format!("init and configure {}", config.node.moniker))
                }
                Phase::NodeConfig => PlannedPhase::skip(phase, "new_setup not requested"),
                Phase::DaemonUnit if templates::should_write_daemon_unit(config) => {
                    PlannedPhase::run(phase, format!("write {}.service", config.daemon_unit_name()))
                }
                Phase::DaemonUnit => PlannedPhase::skip(
                    phase,
                    "upgrade keeps the existing unit (rewrite.node_unit not set)",
                ),
                Phase::LoggingUnits => {
                    PlannedPhase::run(phase, "write rsyslog and logrotate configs if absent")
                }
                Phase::Snapshot if config.init_from_snapshot => PlannedPhase::run(
                    phase,
                    format!(
                        "newest {} snapshot within {} days",
                        config.chain, MAX_SNAPSHOT_DAYS
                    ),
                ),
                Phase::Snapshot => PlannedPhase::skip(phase, "init_from_snapshot not requested"),
            })
            .collect()
    }

    /// Run every planned phase; the first failure ends the run
    pub fn run(&self) -> std::result::Result<ProvisionReport, PhaseFailure> {
        let mut state = RunState::default();
        let mut report = ProvisionReport::default();

        for planned in self.plan() {
            let phase = planned.phase;
            if !planned.runs {
                info!("Skipping {}: {}", phase, planned.reason);
                self.journal.record(
                    &InstallLogEntry::new(phase.as_str(), "skipped", true, planned.reason.as_str())
                        .with_release(state.tag()),
                );
                report.skipped.push(planned);
                continue;
            }

            info!("==> {} ({})", phase, planned.reason);
            match self.execute(phase, &mut state) {
                Ok((change, details)) => {
                    let action = if change.applied() { "applied" } else { "unchanged" };
                    self.journal.record(
                        &InstallLogEntry::new(phase.as_str(), action, true, details.as_str())
                            .with_release(state.tag()),
                    );
                    report.outcomes.push(PhaseOutcome {
                        phase,
                        change,
                        details,
                    });
                }
                Err(source) => {
                    error!("{} failed: {}", phase, source);
                    self.journal.record(
                        &InstallLogEntry::new(phase.as_str(), "failed", false, source.to_string())
                            .with_release(state.tag()),
                    );
                    return Err(PhaseFailure { phase, source });
                }
            }
        }

        report.release = state.tag().map(str::to_string);
        info!(
            "{} {} installed ({} mode)",
            self.config.binary_name,
            report.release.as_deref().unwrap_or("unknown"),
            self.config.mode
        );
        Ok(report)
    }

    fn execute(&self, phase: Phase, state: &mut RunState) -> installer_common::Result<(Change, String)> {
        let (host, config, layout) = (self.host, self.config, &self.layout);
        match phase {
            Phase::PreInstall => self.pre_install(),
            Phase::AcquireBinary => {
                let release = ReleaseFeed::new(host, &config.sources).resolve(config)?;
                let staged = acquire_binary(host, config, &release, &self.platform)?;
                let details = format!("{} staged at {}", release.tag_name, staged.display());
                state.release = Some(release);
                state.staged = Some(staged);
                Ok((Change::Applied, details))
            }
            Phase::ServiceAccount => {
                let change = identity::ensure_service_account(host.exec, config)?;
                Ok((change, config.service_user.clone()))
            }
            Phase::DirectoryTree => {
                let change = identity::ensure_directory_tree(host.exec, config, layout)?;
                Ok((change, layout.root.display().to_string()))
            }
            Phase::InstallBinary => {
                let staged = state.staged.take().ok_or_else(|| InstallError::MissingPrecondition {
                    path: config.paths.work_dir.join(&config.binary_name),
                })?;
                if config.mode.is_supervised() {
                    binary::install_supervised(host, config, layout, &staged)?;
                } else {
                    binary::install_standalone(host, config, layout, &staged)?;
                }
                Ok((Change::Applied, binary::detect(config).to_string()))
            }
            Phase::Environment => {
                let change = environment::apply(config, layout)?;
                Ok((change, config.paths.environment_file.display().to_string()))
            }
            Phase::NodeConfig => {
                let change = node_config::configure(host, config, layout)?;
                Ok((change, config.node.moniker.clone()))
            }
            Phase::DaemonUnit => {
                let change = templates::setup_daemon_unit(host, config, layout)?;
                Ok((change, config.daemon_unit_name().to_string()))
            }
            Phase::LoggingUnits => {
                let change = templates::setup_logging_units(host, config, layout)?;
                Ok((change, config.binary_for_logging().to_string()))
            }
            Phase::Snapshot => {
                let report = snapshot::acquire(host, config, layout, self.today)?;
                Ok((
                    Change::Applied,
                    format!(
                        "{} ({} entries, md5 {})",
                        report.descriptor.url, report.extracted.unpacked, report.checksum
                    ),
                ))
            }
        }
    }

    /// Back up validator state, then clear what a fresh install or a mode
    /// switch must not inherit
    fn pre_install(&self) -> installer_common::Result<(Change, String)> {
        let config = self.config;
        let paths = &config.paths;
        let units = UnitManager::new(self.host.exec);

        let saved = backup::backup_validator_files(&self.layout)?;
        let mut change = if saved.is_empty() {
            Change::Unchanged
        } else {
            Change::Applied
        };
        let mut details = format!("{} file(s) backed up", saved.len());

        if config.fresh_install {
            warn!("Fresh install: removing existing configuration and data");
            units.remove(STANDALONE_UNIT, &paths.unit_file(STANDALONE_UNIT))?;
            units.remove(COSMOVISOR_UNIT, &paths.unit_file(COSMOVISOR_UNIT))?;
            remove_path(&paths.rsyslog_file)?;
            remove_path(&paths.logrotate_file)?;
            units.reload()?;

            remove_path(&paths.installed_cosmovisor())?;
            remove_path(&paths.installed_binary(&config.binary_name))?;
            remove_path(&self.layout.root)?;
            details.push_str(", previous installation removed");
            return Ok((Change::Applied, details));
        }

        if let Some(previous) = self.switched_from() {
            warn!("Switching from {} to {} mode", config.mode.other(), config.mode);
            units.remove(previous, &paths.unit_file(previous))?;
            remove_path(&paths.rsyslog_file)?;
            if config.mode.is_supervised()
                && binary::detect(config) == BinaryState::StandaloneInstalled
            {
                remove_path(&paths.installed_binary(&config.binary_name))?;
            }
            units.reload()?;
            change = Change::Applied;
            details.push_str(&format!(", {} installation removed", config.mode.other()));
        }

        Ok((change, details))
    }
}
