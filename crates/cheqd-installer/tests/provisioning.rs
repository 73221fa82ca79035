//! End-to-end provisioning against the fake host

mod common;

use cheqd_installer::binary::{detect, BinaryState};
use cheqd_installer::{Change, Phase};
use common::{Sandbox, COSMOVISOR_BYTES, DAEMON_BYTES, TAG};
use installer_common::fsutil::is_symlink;
use installer_common::{InstallError, InstallMode, COSMOVISOR_UNIT, STANDALONE_UNIT};
use std::fs;

#[test]
fn test_fresh_standalone_install() {
    let sb = Sandbox::new(InstallMode::Standalone);
    let report = sb.run().unwrap();

    let entry = sb.config.paths.installed_binary("cheqd-noded");
    assert!(entry.is_file());
    assert!(!is_symlink(&entry));
    assert_eq!(fs::read(&entry).unwrap(), DAEMON_BYTES);
    assert!(sb.exec.ran(&format!("chown root:root {}", entry.display())));
    assert!(sb.exec.is_enabled("cheqd-noded.service"));
    assert!(!sb.config.paths.unit_file(COSMOVISOR_UNIT).exists());
    assert!(!sb.layout().cosmovisor.exists());
    assert_eq!(detect(&sb.config), BinaryState::StandaloneInstalled);

    assert_eq!(report.release.as_deref(), Some(TAG));
    let skipped: Vec<Phase> = report.skipped.iter().map(|p| p.phase).collect();
    assert_eq!(skipped, [Phase::NodeConfig, Phase::Snapshot]);
    assert!(!sb.config.paths.work_dir.join("README.md").exists());
}

#[test]
fn test_fresh_supervised_install() {
    let sb = Sandbox::new(InstallMode::Supervised);
    sb.run().unwrap();
    let layout = sb.layout();

    let entry = sb.config.paths.installed_binary("cheqd-noded");
    assert!(is_symlink(&entry));
    assert_eq!(fs::read_link(&entry).unwrap(), layout.supervised_binary("cheqd-noded"));
    assert_eq!(fs::read(&entry).unwrap(), DAEMON_BYTES);
    assert_eq!(
        fs::read(sb.config.paths.installed_cosmovisor()).unwrap(),
        COSMOVISOR_BYTES
    );
    assert!(is_symlink(&layout.cosmovisor_current()));

    assert!(sb.exec.is_enabled("cheqd-cosmovisor.service"));
    assert!(!sb.exec.is_enabled("cheqd-noded.service"));
    assert!(!sb.config.paths.unit_file(STANDALONE_UNIT).exists());

    let unit = fs::read_to_string(sb.config.paths.unit_file(COSMOVISOR_UNIT)).unwrap();
    assert!(unit.contains(&format!("DAEMON_HOME={}", layout.root.display())));
    assert!(unit.contains("DAEMON_NAME=cheqd-noded"));

    let rsyslog = fs::read_to_string(&sb.config.paths.rsyslog_file).unwrap();
    assert!(rsyslog.starts_with("if $programname == 'cosmovisor'"));
}

#[test]
fn test_upgrade_propagates_upgrade_info() {
    let mut sb = Sandbox::new(InstallMode::Supervised);
    sb.config.upgrade = true;
    let layout = sb.layout();
    fs::create_dir_all(&layout.data).unwrap();
    let info = br#"{"name":"v2.0.1","time":"0001-01-01T00:00:00Z","height":1250000}"#;
    fs::write(layout.upgrade_info(), info).unwrap();

    sb.run().unwrap();

    assert_eq!(fs::read(layout.current_upgrade_info()).unwrap(), info);
    assert_eq!(fs::read(layout.backup_upgrade_info()).unwrap(), info);
}

#[test]
fn test_snapshot_larger_than_free_space_fails_before_transfer() {
    let mut sb = Sandbox::new(InstallMode::Standalone);
    sb.config.init_from_snapshot = true;
    sb.space = installer_common::testing::FixedSpace(100 * common::GIB);
    let url = sb.publish_snapshot("2024-03-10", &common::tar_lz4(&[("data/x", b"x")]));
    sb.remote.report_length(&url, 500 * common::GIB);

    let failure = sb.run().unwrap_err();
    assert_eq!(failure.phase, Phase::Snapshot);
    assert!(matches!(
        failure.source,
        InstallError::InsufficientSpace { required, available }
            if required == 500 * common::GIB && available == 100 * common::GIB
    ));
    assert!(!sb.remote.downloads().contains(&url));
}

#[test]
fn test_snapshot_keeps_validator_state() {
    let mut sb = Sandbox::new(InstallMode::Standalone);
    sb.config.upgrade = true;
    sb.config.init_from_snapshot = true;
    let layout = sb.layout();
    fs::create_dir_all(&layout.data).unwrap();
    let state = br#"{"height":"1311000","round":0,"step":3}"#;
    fs::write(layout.validator_state(), state).unwrap();

    let url = sb.publish_snapshot(
        "2024-03-07",
        &common::tar_lz4(&[
            ("data/application.db/CURRENT", b"MANIFEST-000001"),
            ("data/priv_validator_state.json", br#"{"height":"0","round":0,"step":0}"#),
        ]),
    );

    let report = sb.run().unwrap();

    assert_eq!(fs::read(layout.validator_state()).unwrap(), state);
    assert_eq!(
        fs::read(layout.data.join("application.db/CURRENT")).unwrap(),
        b"MANIFEST-000001"
    );
    let archive = layout.root.join(url.rsplit('/').next().unwrap());
    assert!(!archive.exists());
    assert!(report.outcome(Phase::Snapshot).unwrap().details.contains(&url));
}

#[test]
fn test_second_run_changes_nothing_structural() {
    let sb = Sandbox::new(InstallMode::Supervised);
    sb.run().unwrap();
    let second = sb.run().unwrap();

    for phase in [Phase::ServiceAccount, Phase::DirectoryTree, Phase::Environment] {
        assert_eq!(second.outcome(phase).unwrap().change, Change::Unchanged, "{}", phase);
    }
    assert_eq!(sb.exec.count("adduser"), 1);
    assert_eq!(sb.exec.count("addgroup"), 1);
    assert!(is_symlink(&sb.config.paths.installed_binary("cheqd-noded")));

    let env = fs::read_to_string(&sb.config.paths.environment_file).unwrap();
    assert_eq!(env.matches("DAEMON_NAME=").count(), 1);
}

#[test]
fn test_switch_from_standalone_to_supervised() {
    let mut sb = Sandbox::new(InstallMode::Standalone);
    sb.run().unwrap();
    assert!(sb.config.paths.unit_file(STANDALONE_UNIT).exists());

    sb.config.mode = InstallMode::Supervised;
    sb.run().unwrap();

    assert!(!sb.config.paths.unit_file(STANDALONE_UNIT).exists());
    assert!(sb.config.paths.unit_file(COSMOVISOR_UNIT).exists());
    assert!(!sb.exec.is_enabled("cheqd-noded.service"));
    assert!(sb.exec.is_enabled("cheqd-cosmovisor.service"));
    assert_eq!(detect(&sb.config), BinaryState::SupervisedInstalled);
}

#[test]
fn test_upgrade_from_supervised_to_standalone() {
    let mut sb = Sandbox::new(InstallMode::Supervised);
    sb.run().unwrap();

    sb.config.mode = InstallMode::Standalone;
    sb.config.upgrade = true;
    let report = sb.run().unwrap();

    assert_eq!(report.outcome(Phase::DaemonUnit).unwrap().change, Change::Applied);
    assert!(sb.config.paths.unit_file(STANDALONE_UNIT).exists());
    assert!(!sb.config.paths.unit_file(COSMOVISOR_UNIT).exists());
    assert!(sb.exec.is_enabled("cheqd-noded.service"));
    assert!(!sb.exec.is_enabled("cheqd-cosmovisor.service"));
    assert!(!sb.layout().cosmovisor.exists());
    assert_eq!(detect(&sb.config), BinaryState::StandaloneInstalled);

    let rsyslog = fs::read_to_string(&sb.config.paths.rsyslog_file).unwrap();
    assert!(rsyslog.starts_with("if $programname == 'cheqd-noded'"));
}

#[test]
fn test_fresh_install_wipes_root_but_keeps_backup() {
    let mut sb = Sandbox::new(InstallMode::Standalone);
    sb.run().unwrap();
    let layout = sb.layout();
    fs::create_dir_all(&layout.data).unwrap();
    fs::write(layout.validator_state(), b"{\"height\":\"77\"}").unwrap();
    fs::write(layout.data.join("blockstore.db"), b"old").unwrap();

    sb.config.fresh_install = true;
    sb.run().unwrap();

    assert!(!layout.data.join("blockstore.db").exists());
    assert_eq!(fs::read(layout.backup_validator_state()).unwrap(), b"{\"height\":\"77\"}");
    assert!(sb.exec.is_enabled("cheqd-noded.service"));
}

#[test]
fn test_upgrade_keeps_existing_unit_file() {
    let mut sb = Sandbox::new(InstallMode::Standalone);
    sb.run().unwrap();
    let unit = sb.config.paths.unit_file(STANDALONE_UNIT);
    fs::write(&unit, "[Service]\n# operator edit\n").unwrap();

    sb.config.upgrade = true;
    let report = sb.run().unwrap();
    assert!(report.skipped.iter().any(|p| p.phase == Phase::DaemonUnit));
    assert_eq!(fs::read_to_string(&unit).unwrap(), "[Service]\n# operator edit\n");

    sb.config.rewrite.node_unit = true;
    sb.run().unwrap();
    assert!(fs::read_to_string(&unit).unwrap().contains("ExecStart"));
}

#[test]
fn test_new_setup_configures_node() {
    let mut sb = Sandbox::new(InstallMode::Standalone);
    sb.config.new_setup = true;
    sb.config.node.moniker = "validator-1".to_string();
    let layout = sb.layout();
    fs::create_dir_all(&layout.config).unwrap();
    fs::write(
        layout.config_toml(),
        "log_level = \"info\"\n\n[p2p]\nseeds = \"\"\nladdr = \"tcp://0.0.0.0:26656\"\n",
    )
    .unwrap();
    fs::write(layout.app_toml(), "minimum-gas-prices = \"\"\n").unwrap();
    let networks = &sb.config.sources;
    sb.remote.serve(
        &networks.network_file_url(sb.config.chain, "genesis.json"),
        "{\"chain_id\":\"cheqd-testnet-6\"}",
    );
    sb.remote.serve(
        &networks.network_file_url(sb.config.chain, "seeds.txt"),
        "abc@seed1.cheqd.network:26656\n",
    );

    sb.run().unwrap();

    assert!(sb.exec.ran(&format!(
        "[cheqd] {} init validator-1 --chain-id cheqd-testnet-6",
        sb.config.paths.installed_binary("cheqd-noded").display()
    )));
    assert_eq!(
        fs::read_to_string(layout.genesis_file()).unwrap(),
        "{\"chain_id\":\"cheqd-testnet-6\"}"
    );
    let config_toml = fs::read_to_string(layout.config_toml()).unwrap();
    assert!(config_toml.contains("seeds = \"abc@seed1.cheqd.network:26656\""));
    assert!(config_toml.contains("log_level = \"error\""));
    assert_eq!(
        fs::read_to_string(layout.app_toml()).unwrap(),
        "minimum-gas-prices = \"50ncheq\"\n"
    );
}

#[test]
fn test_failure_stops_run_and_is_journaled() {
    let sb = Sandbox::new(InstallMode::Standalone);
    sb.remote.serve_status(
        &sb.config.sources.template_url("cheqd-noded.service"),
        503,
    );

    let failure = sb.run().unwrap_err();
    assert_eq!(failure.phase, Phase::DaemonUnit);
    assert!(!sb.config.paths.rsyslog_file.exists());

    let journal = sb.journal_lines();
    let last = journal.last().unwrap();
    assert_eq!(last["step"], "daemon_unit");
    assert_eq!(last["action"], "failed");
    assert_eq!(last["success"], false);
    assert_eq!(last["release"], TAG);
    assert!(journal.iter().any(|e| e["step"] == "install_binary" && e["success"] == true));
}

#[test]
fn test_missing_asset_fails_before_touching_host() {
    let mut sb = Sandbox::new(InstallMode::Standalone);
    sb.config.release = Some("v9.9.9".to_string());
    sb.remote.serve(
        &format!("{}/tags/v9.9.9", sb.config.sources.releases_url),
        r#"{"tag_name":"v9.9.9","prerelease":false,"assets":[]}"#,
    );

    let failure = sb.run().unwrap_err();
    assert_eq!(failure.phase, Phase::AcquireBinary);
    assert!(matches!(failure.source, InstallError::AssetNotFound { .. }));
    assert!(!sb.exec.ran("adduser"));
}
