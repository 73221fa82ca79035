//! Installer configuration
//!
//! Immutable record of operator intent, loaded once from
//! /etc/cheqd-installer/config.toml (or `--config`) and passed by reference to
//! every component. Every field has a default so an empty file is valid.

use crate::error::{InstallError, IoContext, Result};
use crate::layout::SystemPaths;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{info, warn};

/// Config file path
pub const DEFAULT_CONFIG_PATH: &str = "/etc/cheqd-installer/config.toml";

/// Releases offered for selection (latest + N-1 most recent)
pub const LAST_N_RELEASES: usize = 5;

/// Days probed backwards from today when looking for a snapshot
pub const MAX_SNAPSHOT_DAYS: u32 = 7;

/// Token replaced by the candidate date in snapshot URL templates
pub const DATE_TOKEN: &str = "{DATE}";

/// Supervisor binary name
pub const COSMOVISOR_BINARY_NAME: &str = "cosmovisor";

/// Network the node joins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Mainnet,
    Testnet,
}

impl Chain {
    pub fn chain_id(&self) -> &'static str {
        match self {
            Chain::Mainnet => "cheqd-mainnet-1",
            Chain::Testnet => "cheqd-testnet-6",
        }
    }

    /// Directory name used by the network-files and snapshot hosts
    pub fn network_name(&self) -> &'static str {
        match self {
            Chain::Mainnet => "mainnet",
            Chain::Testnet => "testnet",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.chain_id())
    }
}

impl FromStr for Chain {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mainnet" | "cheqd-mainnet-1" => Ok(Chain::Mainnet),
            "testnet" | "cheqd-testnet-6" => Ok(Chain::Testnet),
            other => Err(format!("unknown chain '{}' (expected mainnet or testnet)", other)),
        }
    }
}

/// How the daemon binary is run under the init system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallMode {
    /// Real binary at /usr/bin/<daemon>, run directly by systemd
    Standalone,
    /// /usr/bin/<daemon> symlinks into cosmovisor/current/bin, cosmovisor is the unit
    Supervised,
}

impl InstallMode {
    pub fn is_supervised(&self) -> bool {
        matches!(self, InstallMode::Supervised)
    }

    pub fn other(&self) -> InstallMode {
        match self {
            InstallMode::Standalone => InstallMode::Supervised,
            InstallMode::Supervised => InstallMode::Standalone,
        }
    }
}

impl fmt::Display for InstallMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstallMode::Standalone => write!(f, "standalone"),
            InstallMode::Supervised => write!(f, "supervised"),
        }
    }
}

/// Node settings applied to config.toml / app.toml on a new setup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSettings {
    #[serde(default = "default_moniker")]
    pub moniker: String,

    /// Public address advertised to peers (empty = not set)
    #[serde(default)]
    pub external_address: String,

    #[serde(default = "default_p2p_port")]
    pub p2p_port: String,

    #[serde(default = "default_rpc_port")]
    pub rpc_port: String,

    /// Comma-separated node-id@host:port list (empty = not set)
    #[serde(default)]
    pub persistent_peers: String,

    #[serde(default = "default_gas_price")]
    pub gas_price: String,

    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            moniker: default_moniker(),
            external_address: String::new(),
            p2p_port: default_p2p_port(),
            rpc_port: default_rpc_port(),
            persistent_peers: String::new(),
            gas_price: default_gas_price(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// Supervisor (cosmovisor) settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CosmovisorSettings {
    #[serde(default = "default_cosmovisor_version")]
    pub version: String,

    #[serde(default = "default_true")]
    pub allow_download_binaries: bool,

    #[serde(default = "default_true")]
    pub restart_after_upgrade: bool,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    #[serde(default = "default_true")]
    pub unsafe_skip_backup: bool,

    #[serde(default = "default_restart_delay")]
    pub restart_delay: String,
}

impl Default for CosmovisorSettings {
    fn default() -> Self {
        Self {
            version: default_cosmovisor_version(),
            allow_download_binaries: true,
            restart_after_upgrade: true,
            poll_interval: default_poll_interval(),
            unsafe_skip_backup: true,
            restart_delay: default_restart_delay(),
        }
    }
}

/// Whether pre-existing unit and logging configuration may be overwritten
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RewriteFlags {
    #[serde(default)]
    pub node_unit: bool,
    #[serde(default)]
    pub rsyslog: bool,
    #[serde(default)]
    pub logrotate: bool,
}

/// Remote locations the installer reads from
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSources {
    /// Release listing endpoint; "/latest" is appended for the latest release
    #[serde(default = "default_releases_url")]
    pub releases_url: String,

    /// Directory holding the unit, rsyslog and logrotate templates
    #[serde(default = "default_templates_url")]
    pub templates_url: String,

    /// Directory holding networks/<network>/{genesis.json,seeds.txt}
    #[serde(default = "default_networks_url")]
    pub networks_url: String,

    #[serde(default = "default_mainnet_snapshot")]
    pub mainnet_snapshot: String,

    #[serde(default = "default_testnet_snapshot")]
    pub testnet_snapshot: String,

    /// Supervisor archive; {VERSION} and {ARCH} are substituted
    #[serde(default = "default_cosmovisor_url")]
    pub cosmovisor_url: String,
}

impl Default for RemoteSources {
    fn default() -> Self {
        Self {
            releases_url: default_releases_url(),
            templates_url: default_templates_url(),
            networks_url: default_networks_url(),
            mainnet_snapshot: default_mainnet_snapshot(),
            testnet_snapshot: default_testnet_snapshot(),
            cosmovisor_url: default_cosmovisor_url(),
        }
    }
}

impl RemoteSources {
    pub fn latest_release_url(&self) -> String {
        format!("{}/latest", self.releases_url.trim_end_matches('/'))
    }

    pub fn snapshot_template(&self, chain: Chain) -> &str {
        match chain {
            Chain::Mainnet => &self.mainnet_snapshot,
            Chain::Testnet => &self.testnet_snapshot,
        }
    }

    pub fn template_url(&self, file_name: &str) -> String {
        format!("{}/{}", self.templates_url.trim_end_matches('/'), file_name)
    }

    pub fn network_file_url(&self, chain: Chain, file_name: &str) -> String {
        format!(
            "{}/{}/{}",
            self.networks_url.trim_end_matches('/'),
            chain.network_name(),
            file_name
        )
    }
}

/// Operator intent for one provisioning run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Configuration {
    /// Service account home; the node root is <home>/.cheqdnode
    #[serde(default = "default_home_dir")]
    pub home_dir: PathBuf,

    #[serde(default = "default_service_user")]
    pub service_user: String,

    #[serde(default = "default_binary_name")]
    pub binary_name: String,

    #[serde(default = "default_chain")]
    pub chain: Chain,

    /// Release tag to install (None = latest stable)
    #[serde(default)]
    pub release: Option<String>,

    #[serde(default = "default_mode")]
    pub mode: InstallMode,

    /// Upgrade an existing installation in place
    #[serde(default)]
    pub upgrade: bool,

    /// Remove all existing configuration and data first
    #[serde(default)]
    pub fresh_install: bool,

    /// Initialise the node and apply [node] settings
    #[serde(default)]
    pub new_setup: bool,

    /// Bootstrap chain state from the most recent snapshot
    #[serde(default)]
    pub init_from_snapshot: bool,

    #[serde(default)]
    pub node: NodeSettings,

    #[serde(default)]
    pub cosmovisor: CosmovisorSettings,

    #[serde(default)]
    pub rewrite: RewriteFlags,

    #[serde(default)]
    pub sources: RemoteSources,

    #[serde(default)]
    pub paths: SystemPaths,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            home_dir: default_home_dir(),
            service_user: default_service_user(),
            binary_name: default_binary_name(),
            chain: default_chain(),
            release: None,
            mode: default_mode(),
            upgrade: false,
            fresh_install: false,
            new_setup: false,
            init_from_snapshot: false,
            node: NodeSettings::default(),
            cosmovisor: CosmovisorSettings::default(),
            rewrite: RewriteFlags::default(),
            sources: RemoteSources::default(),
            paths: SystemPaths::default(),
        }
    }
}

impl Configuration {
    /// Load from an explicit path; the file must exist
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).at(path)?;
        let config = Self::from_toml(&content)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load from the default path, falling back to defaults if it is absent
    pub fn load_default() -> Result<Self> {
        let path = Path::new(DEFAULT_CONFIG_PATH);
        if path.exists() {
            Self::load(path)
        } else {
            warn!(
                "No configuration at {}, using defaults",
                DEFAULT_CONFIG_PATH
            );
            Ok(Self::default())
        }
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| InstallError::Config(e.to_string()))
    }

    /// Reject contradictory or unusable intent before any side effect
    pub fn validate(&self) -> Result<()> {
        if self.upgrade && self.fresh_install {
            return Err(InstallError::Config(
                "upgrade and fresh_install are mutually exclusive".to_string(),
            ));
        }
        if !self.home_dir.is_absolute() {
            return Err(InstallError::Config(format!(
                "home_dir must be absolute, got {}",
                self.home_dir.display()
            )));
        }
        if self.service_user.trim().is_empty() {
            return Err(InstallError::Config("service_user is empty".to_string()));
        }
        if self.binary_name.trim().is_empty() || self.binary_name.contains('/') {
            return Err(InstallError::Config(format!(
                "invalid binary_name '{}'",
                self.binary_name
            )));
        }
        for chain in [Chain::Mainnet, Chain::Testnet] {
            if !self.sources.snapshot_template(chain).contains(DATE_TOKEN) {
                return Err(InstallError::Config(format!(
                    "{} snapshot template lacks {}",
                    chain.network_name(),
                    DATE_TOKEN
                )));
            }
        }
        for (name, port) in [("p2p_port", &self.node.p2p_port), ("rpc_port", &self.node.rpc_port)] {
            if port.parse::<u16>().is_err() {
                return Err(InstallError::Config(format!(
                    "{} must be a port number, got '{}'",
                    name, port
                )));
            }
        }
        Ok(())
    }

    /// Name of the systemd unit that runs the node in this mode
    pub fn daemon_unit_name(&self) -> &'static str {
        match self.mode {
            InstallMode::Supervised => COSMOVISOR_UNIT,
            InstallMode::Standalone => STANDALONE_UNIT,
        }
    }

    /// Binary name rsyslog filters on
    pub fn binary_for_logging(&self) -> &str {
        match self.mode {
            InstallMode::Supervised => COSMOVISOR_BINARY_NAME,
            InstallMode::Standalone => &self.binary_name,
        }
    }
}

/// Unit running cosmovisor
pub const COSMOVISOR_UNIT: &str = "cheqd-cosmovisor";

/// Unit running the daemon directly
pub const STANDALONE_UNIT: &str = "cheqd-noded";

fn default_home_dir() -> PathBuf {
    PathBuf::from("/home/cheqd")
}

fn default_service_user() -> String {
    "cheqd".to_string()
}

fn default_binary_name() -> String {
    "cheqd-noded".to_string()
}

fn default_chain() -> Chain {
    Chain::Mainnet
}

fn default_mode() -> InstallMode {
    InstallMode::Supervised
}

fn default_moniker() -> String {
    fs::read_to_string("/etc/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "cheqd-node".to_string())
}

fn default_p2p_port() -> String {
    "26656".to_string()
}

fn default_rpc_port() -> String {
    "26657".to_string()
}

fn default_gas_price() -> String {
    "50ncheq".to_string()
}

fn default_log_level() -> String {
    "error".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_cosmovisor_version() -> String {
    "v1.2.0".to_string()
}

fn default_poll_interval() -> String {
    "300s".to_string()
}

fn default_restart_delay() -> String {
    "120s".to_string()
}

fn default_true() -> bool {
    true
}

fn default_releases_url() -> String {
    "https://api.github.com/repos/cheqd/cheqd-node/releases".to_string()
}

fn default_templates_url() -> String {
    "https://raw.githubusercontent.com/cheqd/cheqd-node/main/build-tools".to_string()
}

fn default_networks_url() -> String {
    "https://raw.githubusercontent.com/cheqd/cheqd-node/main/networks".to_string()
}

fn default_mainnet_snapshot() -> String {
    "https://snapshots-cdn.cheqd.net/mainnet/{DATE}/cheqd-mainnet-1_{DATE}.tar.lz4".to_string()
}

fn default_testnet_snapshot() -> String {
    "https://snapshots-cdn.cheqd.net/testnet/{DATE}/cheqd-testnet-6_{DATE}.tar.lz4".to_string()
}

fn default_cosmovisor_url() -> String {
    "https://github.com/cosmos/cosmos-sdk/releases/download/cosmovisor%2F{VERSION}/cosmovisor-{VERSION}-linux-{ARCH}.tar.gz"
        .to_string()
}
