//! Daemon environment
//!
//! Variables read by cosmovisor and the node tooling, persisted to the
//! system-wide environment file and exported to this process. The file is
//! edited by key so a re-run never appends duplicates.

use crate::Change;
use installer_common::fsutil::ensure_dir;
use installer_common::{Configuration, DirectoryLayout, IoContext, Result};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

/// One variable and whether an existing value is replaced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvVar {
    pub key: &'static str,
    pub value: String,
    pub overwrite: bool,
}

impl EnvVar {
    fn set(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            overwrite: true,
        }
    }

    fn default_only(key: &'static str, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
            overwrite: false,
        }
    }
}

/// Variables for the configured mode, in write order
pub fn daemon_environment(config: &Configuration, layout: &DirectoryLayout) -> Vec<EnvVar> {
    let root = layout.root.display().to_string();
    let mut vars = Vec::new();
    if config.mode.is_supervised() {
        let cv = &config.cosmovisor;
        vars.extend([
            EnvVar::set("DAEMON_NAME", config.binary_name.clone()),
            EnvVar::default_only("DAEMON_HOME", root.clone()),
            EnvVar::set(
                "DAEMON_ALLOW_DOWNLOAD_BINARIES",
                cv.allow_download_binaries.to_string(),
            ),
            EnvVar::set(
                "DAEMON_RESTART_AFTER_UPGRADE",
                cv.restart_after_upgrade.to_string(),
            ),
            EnvVar::default_only("DAEMON_POLL_INTERVAL", cv.poll_interval.clone()),
            EnvVar::default_only("UNSAFE_SKIP_BACKUP", cv.unsafe_skip_backup.to_string()),
            EnvVar::set("DAEMON_RESTART_DELAY", cv.restart_delay.clone()),
        ]);
    }
    vars.push(EnvVar::set("DEFAULT_CHEQD_HOME_DIR", root));
    vars.push(EnvVar::set("CHEQD_NODED_CHAIN_ID", config.chain.chain_id()));
    vars
}

/// /etc/environment as lines, editable by key
#[derive(Debug, Clone, Default)]
pub struct EnvironmentFile {
    lines: Vec<String>,
}

fn line_key(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return None;
    }
    trimmed
        .split_once('=')
        .map(|(key, _)| key.trim_start_matches("export ").trim())
}

impl EnvironmentFile {
    pub fn parse(content: &str) -> Self {
        Self {
            lines: content.lines().map(str::to_string).collect(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(Self::parse(&fs::read_to_string(path).at(path)?))
    }

    /// Value of the last assignment to `key`, quotes stripped
    pub fn get(&self, key: &str) -> Option<String> {
        self.lines
            .iter()
            .filter(|line| line_key(line) == Some(key))
            .filter_map(|line| line.split_once('=').map(|(_, v)| v.trim()))
            .last()
            .map(|v| v.trim_matches('"').to_string())
    }

    /// Replace every assignment to `key` with one `KEY=value` line. Returns
    /// whether the file content changed.
    pub fn set(&mut self, key: &str, value: &str) -> bool {
        let wanted = format!("{}={}", key, value);
        let positions: Vec<usize> = self
            .lines
            .iter()
            .enumerate()
            .filter(|(_, line)| line_key(line) == Some(key))
            .map(|(i, _)| i)
            .collect();

        match positions.split_first() {
            None => {
                self.lines.push(wanted);
                true
            }
            Some((&first, rest)) => {
                let changed = self.lines[first] != wanted || !rest.is_empty();
                self.lines[first] = wanted;
                for &i in rest.iter().rev() {
                    self.lines.remove(i);
                }
                changed
            }
        }
    }

    pub fn render(&self) -> String {
        let mut out = self.lines.join("\n");
        out.push('\n');
        out
    }
}

/// Persist the daemon environment and export it to this process
pub fn apply(config: &Configuration, layout: &DirectoryLayout) -> Result<Change> {
    let path = &config.paths.environment_file;
    let mut file = EnvironmentFile::load(path)?;
    let mut changed = false;

    for var in daemon_environment(config, layout) {
        let value = match file.get(var.key) {
            Some(existing) if !var.overwrite => {
                debug!("{} already set to {}, keeping it", var.key, existing);
                existing
            }
            _ => {
                if file.set(var.key, &var.value) {
                    info!("Setting {}={}", var.key, var.value);
                    changed = true;
                }
                var.value
            }
        };
        std::env::set_var(var.key, value);
    }

    if !changed {
        return Ok(Change::Unchanged);
    }
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    fs::write(path, file.render()).at(path)?;
    Ok(Change::Applied)
}
