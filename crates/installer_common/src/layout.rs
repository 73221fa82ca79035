//! Path model for the node installation
//!
//! `SystemPaths` holds the fixed host locations (overridable through the
//! `[paths]` config section). `DirectoryLayout` derives every node path from
//! the configuration; nothing here touches the filesystem.

use crate::config::{Configuration, COSMOVISOR_BINARY_NAME};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Validator signing-height watermark, never overwritten by snapshot data
pub const VALIDATOR_STATE_FILE: &str = "priv_validator_state.json";

/// Marker cosmovisor needs to recognise an applied upgrade
pub const UPGRADE_INFO_FILE: &str = "upgrade-info.json";

/// Node root directory name under the service home
pub const NODE_ROOT_DIR_NAME: &str = ".cheqdnode";

/// Host locations written to by the installer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemPaths {
    /// Where /usr/bin/<daemon> and /usr/bin/cosmovisor live
    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    #[serde(default = "default_unit_dir")]
    pub unit_dir: PathBuf,

    #[serde(default = "default_rsyslog_file")]
    pub rsyslog_file: PathBuf,

    #[serde(default = "default_logrotate_file")]
    pub logrotate_file: PathBuf,

    /// Symlink pointing at the managed log directory
    #[serde(default = "default_system_log_link")]
    pub system_log_link: PathBuf,

    #[serde(default = "default_environment_file")]
    pub environment_file: PathBuf,

    /// Staging directory for downloaded archives and binaries
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,

    #[serde(default = "default_journal_file")]
    pub journal_file: PathBuf,
}

impl Default for SystemPaths {
    fn default() -> Self {
        Self {
            install_dir: default_install_dir(),
            unit_dir: default_unit_dir(),
            rsyslog_file: default_rsyslog_file(),
            logrotate_file: default_logrotate_file(),
            system_log_link: default_system_log_link(),
            environment_file: default_environment_file(),
            work_dir: default_work_dir(),
            journal_file: default_journal_file(),
        }
    }
}

impl SystemPaths {
    /// Every host location rooted under `root`, for sandboxed runs
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            install_dir: root.join("usr/bin"),
            unit_dir: root.join("lib/systemd/system"),
            rsyslog_file: root.join("etc/rsyslog.d/cheqd-node.conf"),
            logrotate_file: root.join("etc/logrotate.d/cheqd-node"),
            system_log_link: root.join("var/log/cheqd-node"),
            environment_file: root.join("etc/environment"),
            work_dir: root.join("var/tmp/cheqd-installer"),
            journal_file: root.join("var/lib/cheqd-installer/install.jsonl"),
        }
    }

    pub fn installed_binary(&self, binary_name: &str) -> PathBuf {
        self.install_dir.join(binary_name)
    }

    pub fn installed_cosmovisor(&self) -> PathBuf {
        self.install_dir.join(COSMOVISOR_BINARY_NAME)
    }

    pub fn unit_file(&self, unit: &str) -> PathBuf {
        self.unit_dir.join(format!("{}.service", unit))
    }
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/usr/bin")
}

fn default_unit_dir() -> PathBuf {
    PathBuf::from("/lib/systemd/system")
}

fn default_rsyslog_file() -> PathBuf {
    PathBuf::from("/etc/rsyslog.d/cheqd-node.conf")
}

fn default_logrotate_file() -> PathBuf {
    PathBuf::from("/etc/logrotate.d/cheqd-node")
}

fn default_system_log_link() -> PathBuf {
    PathBuf::from("/var/log/cheqd-node")
}

fn default_environment_file() -> PathBuf {
    PathBuf::from("/etc/environment")
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("/var/tmp/cheqd-installer")
}

fn default_journal_file() -> PathBuf {
    PathBuf::from("/var/lib/cheqd-installer/install.jsonl")
}

/// Node directory tree, derived from the configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryLayout {
    pub home: PathBuf,
    pub root: PathBuf,
    pub config: PathBuf,
    pub data: PathBuf,
    pub log: PathBuf,
    pub cosmovisor: PathBuf,
    /// Preserved validator files, outside the root so a fresh install keeps them
    pub backup: PathBuf,
}

impl DirectoryLayout {
    pub fn new(home: &Path) -> Self {
        let root = home.join(NODE_ROOT_DIR_NAME);
        Self {
            home: home.to_path_buf(),
            config: root.join("config"),
            data: root.join("data"),
            log: root.join("log"),
            cosmovisor: root.join("cosmovisor"),
            backup: home.join("backup"),
            root,
        }
    }

    pub fn from_config(config: &Configuration) -> Self {
        Self::new(&config.home_dir)
    }

    pub fn log_file(&self) -> PathBuf {
        self.log.join("stdout.log")
    }

    pub fn genesis_file(&self) -> PathBuf {
        self.config.join("genesis.json")
    }

    pub fn config_toml(&self) -> PathBuf {
        self.config.join("config.toml")
    }

    pub fn app_toml(&self) -> PathBuf {
        self.config.join("app.toml")
    }

    pub fn validator_state(&self) -> PathBuf {
        self.data.join(VALIDATOR_STATE_FILE)
    }

    pub fn upgrade_info(&self) -> PathBuf {
        self.data.join(UPGRADE_INFO_FILE)
    }

    pub fn cosmovisor_genesis(&self) -> PathBuf {
        self.cosmovisor.join("genesis")
    }

    pub fn cosmovisor_current(&self) -> PathBuf {
        self.cosmovisor.join("current")
    }

    /// Supervised daemon location: cosmovisor/current/bin/<daemon>
    pub fn supervised_binary(&self, binary_name: &str) -> PathBuf {
        self.cosmovisor_current().join("bin").join(binary_name)
    }

    pub fn current_upgrade_info(&self) -> PathBuf {
        self.cosmovisor_current().join(UPGRADE_INFO_FILE)
    }

    pub fn backup_validator_state(&self) -> PathBuf {
        self.backup.join(VALIDATOR_STATE_FILE)
    }

    pub fn backup_upgrade_info(&self) -> PathBuf {
        self.backup.join(UPGRADE_INFO_FILE)
    }
}
