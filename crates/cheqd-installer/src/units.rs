//! Unit Lifecycle Manager
//!
//! Idempotent systemctl wrappers. A unit systemd does not know is treated as
//! both inactive and disabled. Unit names without a suffix get ".service".

use crate::Change;
use installer_common::fsutil::remove_path;
use installer_common::{CommandOutput, CommandSpec, Executor, Result};
use std::path::Path;
use tracing::{debug, info, warn};

pub struct UnitManager<'a> {
    exec: &'a dyn Executor,
}

/// "cheqd-noded" -> "cheqd-noded.service"; "logrotate.timer" stays as is
pub fn unit_name(name: &str) -> String {
    if name.contains('.') {
        name.to_string()
    } else {
        format!("{}.service", name)
    }
}

impl<'a> UnitManager<'a> {
    pub fn new(exec: &'a dyn Executor) -> Self {
        Self { exec }
    }

    fn systemctl(&self, args: &[&str]) -> Result<CommandOutput> {
        self.exec.run(&CommandSpec::new("systemctl").args(args.iter().copied()))
    }

    fn systemctl_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        self.exec
            .run_checked(&CommandSpec::new("systemctl").args(args.iter().copied()))
    }

    /// Whether systemd has a unit file for `name` (`systemctl cat` exits 0)
    pub fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.systemctl(&["cat", &unit_name(name)])?.success())
    }

    pub fn is_active(&self, name: &str) -> Result<bool> {
        let unit = unit_name(name);
        if !self.exists(&unit)? {
            debug!("{} is not installed", unit);
            return Ok(false);
        }
        Ok(self.systemctl(&["is-active", "--quiet", &unit])?.success())
    }

    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        let unit = unit_name(name);
        if !self.exists(&unit)? {
            debug!("{} is not installed", unit);
            return Ok(false);
        }
        Ok(self.systemctl(&["is-enabled", "--quiet", &unit])?.success())
    }

    /// Reload unit files and clear failed-unit state
    pub fn reload(&self) -> Result<()> {
        self.systemctl_checked(&["daemon-reload"])?;
        self.systemctl_checked(&["reset-failed"])?;
        debug!("Reloaded systemd config and reset failed units");
        Ok(())
    }

    pub fn disable(&self, name: &str) -> Result<Change> {
        let unit = unit_name(name);
        if !self.is_enabled(&unit)? {
            debug!("{} is already disabled", unit);
            return Ok(Change::Unchanged);
        }
        self.systemctl_checked(&["disable", "--quiet", &unit])?;
        info!("{} has been disabled", unit);
        Ok(Change::Applied)
    }

    pub fn enable(&self, name: &str) -> Result<Change> {
        let unit = unit_name(name);
        self.reload()?;
        if self.is_enabled(&unit)? {
            debug!("{} is already enabled", unit);
            return Ok(Change::Unchanged);
        }
        self.systemctl_checked(&["enable", "--quiet", &unit])?;
        info!("{} has been enabled", unit);
        Ok(Change::Applied)
    }

    pub fn stop(&self, name: &str) -> Result<Change> {
        let unit = unit_name(name);
        if !self.is_active(&unit)? {
            debug!("{} is not active", unit);
            return Ok(Change::Unchanged);
        }
        self.systemctl_checked(&["stop", "--quiet", &unit])?;
        info!("{} has been stopped", unit);
        Ok(Change::Applied)
    }

    /// Enable if needed, reload, restart. The first failing step ends the operation.
    pub fn restart(&self, name: &str) -> Result<()> {
        let unit = unit_name(name);
        if !self.is_enabled(&unit)? {
            self.enable(&unit)?;
        }
        self.reload()?;
        self.systemctl_checked(&["restart", "--quiet", &unit])?;
        info!("{} has been restarted", unit);
        Ok(())
    }

    /// Stop, disable and delete a unit whose file exists; no-op otherwise
    pub fn remove(&self, name: &str, unit_file: &Path) -> Result<Change> {
        if !unit_file.exists() {
            debug!("{} not present, nothing to remove", unit_file.display());
            return Ok(Change::Unchanged);
        }
        let unit = unit_name(name);
        self.stop(&unit)?;
        self.disable(&unit)?;
        remove_path(unit_file)?;
        warn!("{} has been removed", unit);
        Ok(Change::Applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use installer_common::testing::FakeHost;
    use std::fs;

    fn unit_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[test]
    fn test_unit_name_suffix() {
        assert_eq!(unit_name("cheqd-noded"), "cheqd-noded.service");
        assert_eq!(unit_name("logrotate.timer"), "logrotate.timer");
    }

    #[test]
    fn test_unknown_unit_inactive_and_disabled() {
        let host = FakeHost::new();
        let units = UnitManager::new(&host);
        assert!(!units.is_active("ghost").unwrap());
        assert!(!units.is_enabled("ghost").unwrap());
        assert!(!host.ran("systemctl is-active"));
    }

    #[test]
    fn test_enable_is_idempotent() {
        let dir = unit_dir();
        fs::write(dir.path().join("cheqd-noded.service"), "[Unit]").unwrap();
        let host = FakeHost::new().with_unit_dir(dir.path());
        let units = UnitManager::new(&host);

        assert_eq!(units.enable("cheqd-noded").unwrap(), Change::Applied);
        assert_eq!(units.enable("cheqd-noded").unwrap(), Change::Unchanged);
        assert_eq!(host.count("systemctl enable"), 1);
        assert_eq!(host.count("systemctl daemon-reload"), 2);
    }

    #[test]
    fn test_enable_missing_unit_fails() {
        let host = FakeHost::new().with_unit_dir(unit_dir().path());
        let err = UnitManager::new(&host).enable("cheqd-noded").unwrap_err();
        assert_eq!(err.kind(), installer_common::ErrorKind::OsState);
    }

    #[test]
    fn test_restart_enables_first() {
        let host = FakeHost::new().with_builtin_unit("rsyslog.service");
        UnitManager::new(&host).restart("rsyslog").unwrap();

        assert!(host.is_enabled("rsyslog.service"));
        assert!(host.is_active("rsyslog.service"));
    }

    #[test]
    fn test_restart_failure_reported() {
        let host = FakeHost::new()
            .with_builtin_unit("rsyslog.service")
            .fail_on("systemctl daemon-reload", 1);
        assert!(UnitManager::new(&host).restart("rsyslog").is_err());
        assert!(!host.ran("systemctl restart"));
    }

    #[test]
    fn test_remove_stops_disables_deletes() {
        let dir = unit_dir();
        let file = dir.path().join("cheqd-cosmovisor.service");
        fs::write(&file, "[Unit]").unwrap();
        let host = FakeHost::new()
            .with_unit_dir(dir.path())
            .with_enabled("cheqd-cosmovisor.service")
            .with_active("cheqd-cosmovisor.service");
        let units = UnitManager::new(&host);

        assert_eq!(units.remove("cheqd-cosmovisor", &file).unwrap(), Change::Applied);
        assert!(!file.exists());
        assert!(!host.is_active("cheqd-cosmovisor.service"));
        assert!(!host.is_enabled("cheqd-cosmovisor.service"));

        assert_eq!(units.remove("cheqd-cosmovisor", &file).unwrap(), Change::Unchanged);
    }

    #[test]
    fn test_remove_disable_failure_keeps_file() {
        let dir = unit_dir();
        let file = dir.path().join("cheqd-noded.service");
        fs::write(&file, "[Unit]").unwrap();
        let host = FakeHost::new()
            .with_unit_dir(dir.path())
            .with_enabled("cheqd-noded.service")
            .with_active("cheqd-noded.service")
            .fail_on("systemctl disable", 1);

        assert!(UnitManager::new(&host).remove("cheqd-noded", &file).is_err());
        assert!(file.exists());
        assert_eq!(host.count("systemctl stop"), 1);
    }
}
