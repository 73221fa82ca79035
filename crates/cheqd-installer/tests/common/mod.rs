//! Shared sandbox for the end-to-end tests
//!
//! Every host path lives under a temp dir. The fake init system knows the
//! rsyslog and logrotate units and any unit file written to the sandbox.
#![allow(dead_code)]

use cheqd_installer::binary::cosmovisor_url;
use cheqd_installer::release::Platform;
use cheqd_installer::snapshot::discovery;
use cheqd_installer::templates::{LOGROTATE_TEMPLATE, RSYSLOG_TEMPLATE};
use cheqd_installer::{Host, Orchestrator, PhaseFailure, ProvisionReport};
use chrono::NaiveDate;
use flate2::write::GzEncoder;
use flate2::Compression;
use installer_common::testing::{FakeHost, FakeRemote, FixedSpace};
use installer_common::{
    Chain, Configuration, DirectoryLayout, InstallMode, Journal, SystemPaths, COSMOVISOR_UNIT,
    STANDALONE_UNIT,
};
use std::io::Write;
use tempfile::TempDir;

pub const TAG: &str = "v2.0.1";
pub const DAEMON_BYTES: &[u8] = b"\x7fELF cheqd-noded 2.0.1";
pub const COSMOVISOR_BYTES: &[u8] = b"\x7fELF cosmovisor 1.2.0";
pub const SNAPSHOT_TEMPLATE: &str =
    "https://snapshots.test/testnet/{DATE}/cheqd-testnet-6_{DATE}.tar.lz4";

pub const GIB: u64 = 1024 * 1024 * 1024;

pub fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 10).unwrap()
}

pub fn platform() -> Platform {
    Platform::new("linux", "x86_64")
}

pub fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

pub fn tar_lz4(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, path, *content).unwrap();
    }
    let mut encoder = lz4_flex::frame::FrameEncoder::new(Vec::new());
    encoder.write_all(&builder.into_inner().unwrap()).unwrap();
    encoder.finish().unwrap()
}

pub struct Sandbox {
    pub dir: TempDir,
    pub config: Configuration,
    pub exec: FakeHost,
    pub remote: FakeRemote,
    pub space: FixedSpace,
    pub journal: Journal,
}

impl Sandbox {
    pub fn new(mode: InstallMode) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Configuration {
            home_dir: dir.path().join("home/cheqd"),
            paths: SystemPaths::rooted_at(dir.path()),
            chain: Chain::Testnet,
            mode,
            ..Default::default()
        };
        config.sources.releases_url = "https://api.test/repos/cheqd/cheqd-node/releases".to_string();
        config.sources.templates_url = "https://raw.test/build-tools".to_string();
        config.sources.networks_url = "https://raw.test/networks".to_string();
        config.sources.testnet_snapshot = SNAPSHOT_TEMPLATE.to_string();
        config.sources.cosmovisor_url =
            "https://dl.test/cosmovisor/{VERSION}/cosmovisor-{VERSION}-linux-{ARCH}.tar.gz".to_string();

        let exec = FakeHost::new()
            .with_unit_dir(&config.paths.unit_dir)
            .with_builtin_unit("rsyslog.service")
            .with_builtin_unit("logrotate.service")
            .with_builtin_unit("logrotate.timer");
        let journal = Journal::open(&config.paths.journal_file);

        let sandbox = Self {
            dir,
            config,
            exec,
            remote: FakeRemote::new(),
            space: FixedSpace(500 * GIB),
            journal,
        };
        sandbox.publish_release();
        sandbox.publish_templates();
        sandbox
    }

    pub fn layout(&self) -> DirectoryLayout {
        DirectoryLayout::from_config(&self.config)
    }

    pub fn asset_url(&self) -> String {
        format!(
            "https://github.test/cheqd/cheqd-node/releases/download/{}/cheqd-noded-2.0.1-linux-amd64.tar.gz",
            TAG
        )
    }

    fn publish_release(&self) {
        let release = serde_json::json!({
            "tag_name": TAG,
            "prerelease": false,
            "assets": [
                {
                    "name": "cheqd-noded-2.0.1-linux-arm64.tar.gz",
                    "browser_download_url": self.asset_url().replace("amd64", "arm64"),
                },
                {
                    "name": "cheqd-noded-2.0.1-linux-amd64.tar.gz",
                    "browser_download_url": self.asset_url(),
                },
            ],
        });
        self.remote
            .serve(&self.config.sources.latest_release_url(), release.to_string());
        self.remote.serve(
            &self.asset_url(),
            tar_gz(&[("cheqd-noded", DAEMON_BYTES), ("README.md", b"readme")]),
        );
        self.remote.serve(
            &cosmovisor_url(&self.config, std::env::consts::ARCH),
            tar_gz(&[("cosmovisor", COSMOVISOR_BYTES), ("LICENSE", b"license")]),
        );
    }

    fn publish_templates(&self) {
        let sources = &self.config.sources;
        self.remote.serve(
            &sources.template_url(&format!("{}.service", STANDALONE_UNIT)),
            "[Service]\nExecStart=/usr/bin/cheqd-noded start\nUser=cheqd\n",
        );
        self.remote.serve(
            &sources.template_url(&format!("{}.service", COSMOVISOR_UNIT)),
            "[Service]\nEnvironment=\"DAEMON_HOME={CHEQD_ROOT_DIR}\"\n\
             Environment=\"DAEMON_NAME={DEFAULT_BINARY_NAME}\"\n\
             ExecStart=/usr/bin/cosmovisor run start\n",
        );
        self.remote.serve(
            &sources.template_url(RSYSLOG_TEMPLATE),
            "if $programname == '{BINARY_FOR_LOGGING}' then {CHEQD_LOG_DIR}/stdout.log\n",
        );
        self.remote.serve(
            &sources.template_url(LOGROTATE_TEMPLATE),
            "{CHEQD_LOG_DIR}/stdout.log {\n  daily\n}\n",
        );
    }

    /// Publish a snapshot for `date` with its md5sum.txt; returns the archive URL
    pub fn publish_snapshot(&self, date: &str, archive: &[u8]) -> String {
        let url = SNAPSHOT_TEMPLATE.replace("{DATE}", date);
        self.remote.serve(&url, archive.to_vec());
        self.remote.serve(
            &discovery::checksum_url(&url),
            format!("{:x}  cheqd-testnet-6_{}.tar.lz4\n", md5::compute(archive), date),
        );
        url
    }

    pub fn orchestrator(&self) -> Orchestrator<'_> {
        let host = Host::new(&self.exec, &self.remote, &self.space);
        Orchestrator::new(host, &self.config, &self.journal, platform()).with_today(today())
    }

    pub fn run(&self) -> Result<ProvisionReport, PhaseFailure> {
        self.orchestrator().run()
    }

    pub fn journal_lines(&self) -> Vec<serde_json::Value> {
        std::fs::read_to_string(&self.config.paths.journal_file)
            .unwrap_or_default()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}
