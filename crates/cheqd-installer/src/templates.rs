//! Unit and logging templates
//!
//! The systemd units, rsyslog rule and logrotate policy are fetched from the
//! build-tools directory of the node repository and rendered with
//! `{TOKEN}` substitution before being written to their system paths.

use crate::units::UnitManager;
use crate::{Change, Host};
use installer_common::fsutil::ensure_dir;
use installer_common::{
    Configuration, DirectoryLayout, IoContext, Result, COSMOVISOR_UNIT, STANDALONE_UNIT,
};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

pub const RSYSLOG_TEMPLATE: &str = "rsyslog.conf";
pub const LOGROTATE_TEMPLATE: &str = "logrotate.conf";

/// Units restarted after their configuration changes
pub const RSYSLOG_UNIT: &str = "rsyslog.service";
pub const LOGROTATE_UNIT: &str = "logrotate.service";
pub const LOGROTATE_TIMER: &str = "logrotate.timer";

/// Template file for a daemon unit is named after the unit
pub fn unit_template(unit: &str) -> String {
    format!("{}.service", unit)
}

/// Token -> value pairs for every template
pub fn substitutions(config: &Configuration, layout: &DirectoryLayout) -> Vec<(&'static str, String)> {
    let cv = &config.cosmovisor;
    vec![
        ("{CHEQD_ROOT_DIR}", layout.root.display().to_string()),
        ("{DEFAULT_BINARY_NAME}", config.binary_name.clone()),
        (
            "{COSMOVISOR_DAEMON_ALLOW_DOWNLOAD_BINARIES}",
            cv.allow_download_binaries.to_string(),
        ),
        (
            "{COSMOVISOR_DAEMON_RESTART_AFTER_UPGRADE}",
            cv.restart_after_upgrade.to_string(),
        ),
        ("{DEFAULT_DAEMON_POLL_INTERVAL}", cv.poll_interval.clone()),
        ("{DEFAULT_UNSAFE_SKIP_BACKUP}", cv.unsafe_skip_backup.to_string()),
        ("{DEFAULT_DAEMON_RESTART_DELAY}", cv.restart_delay.clone()),
        ("{BINARY_FOR_LOGGING}", config.binary_for_logging().to_string()),
        ("{CHEQD_LOG_DIR}", layout.log.display().to_string()),
    ]
}

/// Single left-to-right pass; substituted values are never rescanned and
/// unknown `{...}` sequences are kept verbatim.
pub fn render(template: &str, values: &[(&str, String)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        match values.iter().find(|(token, _)| tail.starts_with(token)) {
            Some((token, value)) => {
                out.push_str(value);
                rest = &tail[token.len()..];
            }
            None => {
                out.push('{');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

pub fn fetch_rendered(
    host: Host<'_>,
    config: &Configuration,
    layout: &DirectoryLayout,
    template: &str,
) -> Result<String> {
    let raw = host
        .remote
        .fetch_text(&config.sources.template_url(template))?;
    Ok(render(&raw, &substitutions(config, layout)))
}

fn write_config(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, content).at(path)
}

/// Whether the daemon unit files get (re)written on this run. An upgrade keeps
/// the unit only when it is the one for the configured mode.
pub fn should_write_daemon_unit(config: &Configuration) -> bool {
    let configured_exists = config.paths.unit_file(config.daemon_unit_name()).exists();
    !config.upgrade || config.rewrite.node_unit || !configured_exists
}

/// Replace both daemon units by the one for the configured mode, and enable it
pub fn setup_daemon_unit(
    host: Host<'_>,
    config: &Configuration,
    layout: &DirectoryLayout,
) -> Result<Change> {
    if !should_write_daemon_unit(config) {
        info!("Keeping existing daemon unit (upgrade without rewrite)");
        return Ok(Change::Unchanged);
    }

    let unit = config.daemon_unit_name();
    // Fetch before removing anything, so an unreachable template leaves the old unit in place
    let content = fetch_rendered(host, config, layout, &unit_template(unit))?;

    let units = UnitManager::new(host.exec);
    let paths = &config.paths;
    units.remove(COSMOVISOR_UNIT, &paths.unit_file(COSMOVISOR_UNIT))?;
    units.remove(STANDALONE_UNIT, &paths.unit_file(STANDALONE_UNIT))?;

    info!("Installing {}.service ({} mode)", unit, config.mode);
    write_config(&paths.unit_file(unit), &content)?;
    units.enable(unit)?;
    Ok(Change::Applied)
}

/// Write the rsyslog and logrotate configs when absent or when a rewrite was requested
pub fn setup_logging_units(
    host: Host<'_>,
    config: &Configuration,
    layout: &DirectoryLayout,
) -> Result<Change> {
    let units = UnitManager::new(host.exec);
    let paths = &config.paths;
    let mut change = Change::Unchanged;

    if !paths.rsyslog_file.exists() || config.rewrite.rsyslog {
        if paths.rsyslog_file.exists() {
            warn!(
                "Existing rsyslog configuration at {} will be overwritten",
                paths.rsyslog_file.display()
            );
        }
        info!(
            "Configuring rsyslog for {} logging",
            config.binary_for_logging()
        );
        let content = fetch_rendered(host, config, layout, RSYSLOG_TEMPLATE)?;
        write_config(&paths.rsyslog_file, &content)?;
        units.restart(RSYSLOG_UNIT)?;
        change = Change::Applied;
    }

    if !paths.logrotate_file.exists() || config.rewrite.logrotate {
        if paths.logrotate_file.exists() {
            warn!(
                "Existing logrotate configuration at {} will be overwritten",
                paths.logrotate_file.display()
            );
        }
        let content = fetch_rendered(host, config, layout, LOGROTATE_TEMPLATE)?;
        write_config(&paths.logrotate_file, &content)?;
        units.restart(LOGROTATE_UNIT)?;
        units.restart(LOGROTATE_TIMER)?;
        change = Change::Applied;
    }

    Ok(change)
}
