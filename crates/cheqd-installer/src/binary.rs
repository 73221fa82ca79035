//! Service Binary Manager
//!
//! Places the daemon either as a real file at /usr/bin/<daemon> (standalone)
//! or under cosmovisor/current/bin with /usr/bin/<daemon> as a symlink to it
//! (supervised). Every destructive step is preceded by an existence or
//! is-symlink check so a half-finished previous run resolves cleanly.

use crate::archive;
use crate::release::normalize_arch;
use crate::Host;
use installer_common::fsutil::{
    self, copy_file, ensure_dir, is_symlink, move_file, path_exists, remove_path, set_mode, Owner,
};
use installer_common::{
    Configuration, DirectoryLayout, IoContext, Result, COSMOVISOR_BINARY_NAME,
};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What currently sits at the system install path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryState {
    NotInstalled,
    StandaloneInstalled,
    SupervisedInstalled,
}

impl fmt::Display for BinaryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BinaryState::NotInstalled => write!(f, "not installed"),
            BinaryState::StandaloneInstalled => write!(f, "standalone"),
            BinaryState::SupervisedInstalled => write!(f, "supervised"),
        }
    }
}

pub fn detect(config: &Configuration) -> BinaryState {
    let installed = config.paths.installed_binary(&config.binary_name);
    if is_symlink(&installed) {
        BinaryState::SupervisedInstalled
    } else if installed.is_file() {
        BinaryState::StandaloneInstalled
    } else {
        BinaryState::NotInstalled
    }
}

/// Move the staged daemon to /usr/bin/<daemon> as a root-owned real file and
/// drop any supervisor tree.
pub fn install_standalone(
    host: Host<'_>,
    config: &Configuration,
    layout: &DirectoryLayout,
    staged: &Path,
) -> Result<()> {
    let target = config.paths.installed_binary(&config.binary_name);

    if is_symlink(&target) {
        warn!("Removing symlink {} left by a supervised install", target.display());
        remove_path(&target)?;
    }

    info!("Installing {} to {}", config.binary_name, target.display());
    move_file(staged, &target)?;
    fsutil::chown(host.exec, &target, &Owner::root(), false)?;

    if path_exists(&layout.cosmovisor) {
        warn!("Removing stale supervisor directory {}", layout.cosmovisor.display());
        remove_path(&layout.cosmovisor)?;
    }
    Ok(())
}

/// Supervisor archive URL for the configured version and this machine
pub fn cosmovisor_url(config: &Configuration, machine: &str) -> String {
    config
        .sources
        .cosmovisor_url
        .replace("{VERSION}", &config.cosmovisor.version)
        .replace("{ARCH}", normalize_arch(machine))
}

/// Download cosmovisor and place it at /usr/bin/cosmovisor, owned by root
pub fn acquire_cosmovisor(host: Host<'_>, config: &Configuration) -> Result<PathBuf> {
    let url = cosmovisor_url(config, std::env::consts::ARCH);
    info!("Downloading cosmovisor {}", config.cosmovisor.version);
    debug!("Cosmovisor archive: {}", url);

    let work_dir = &config.paths.work_dir;
    ensure_dir(work_dir)?;
    let archive_path = work_dir.join("cosmovisor.tar.gz");
    // A stale partial archive from another version must not be resumed
    remove_path(&archive_path)?;
    host.remote.download(&url, &archive_path)?;

    let staged = archive::unpack_binary(&archive_path, COSMOVISOR_BINARY_NAME, work_dir)?;
    remove_path(&archive_path)?;
    set_mode(&staged, 0o755)?;

    let target = config.paths.installed_cosmovisor();
    move_file(&staged, &target)?;
    fsutil::chown(host.exec, &target, &Owner::root(), false)?;
    Ok(target)
}

/// genesis/bin plus current -> genesis; only when the supervisor root is absent
pub fn init_cosmovisor_layout(layout: &DirectoryLayout) -> Result<bool> {
    if path_exists(&layout.cosmovisor) {
        debug!("{} already initialised", layout.cosmovisor.display());
        return Ok(false);
    }
    info!("Initialising supervisor layout in {}", layout.cosmovisor.display());
    ensure_dir(&layout.cosmovisor_genesis().join("bin"))?;
    fsutil::symlink(&layout.cosmovisor_genesis(), &layout.cosmovisor_current())?;
    Ok(true)
}

/// Install cosmovisor and put the staged daemon under its current/bin, with
/// /usr/bin/<daemon> ending up as a symlink to it.
pub fn install_supervised(
    host: Host<'_>,
    config: &Configuration,
    layout: &DirectoryLayout,
    staged: &Path,
) -> Result<()> {
    acquire_cosmovisor(host, config)?;
    init_cosmovisor_layout(layout)?;

    let entry = config.paths.installed_binary(&config.binary_name);
    let supervised = layout.supervised_binary(&config.binary_name);

    if is_symlink(&entry) {
        let target = fs::read_link(&entry).at(&entry)?;
        if target != supervised {
            warn!(
                "Replacing {} -> {}, which is not the supervised binary",
                entry.display(),
                target.display()
            );
            remove_path(&entry)?;
        }
    } else if path_exists(&entry) {
        warn!(
            "Removing {} because it is not a symlink",
            entry.display()
        );
        remove_path(&entry)?;
    }

    info!("Moving {} to {}", config.binary_name, supervised.display());
    move_file(staged, &supervised)?;

    if !path_exists(&entry) {
        info!("Linking {} -> {}", entry.display(), supervised.display());
        fsutil::symlink(&supervised, &entry)?;
    } else {
        debug!("{} already links to {}", entry.display(), supervised.display());
    }

    fsutil::chown(
        host.exec,
        &layout.cosmovisor,
        &Owner::service(&config.service_user),
        true,
    )?;

    if config.upgrade {
        copy_upgrade_info(layout)?;
    }
    Ok(())
}

/// data/upgrade-info.json -> cosmovisor/current/, which cosmovisor reads to
/// recognise an upgrade that has already been applied
pub fn copy_upgrade_info(layout: &DirectoryLayout) -> Result<bool> {
    let source = layout.upgrade_info();
    if !source.is_file() {
        debug!("No {} to propagate", source.display());
        return Ok(false);
    }
    info!("Copying {} to {}", source.display(), layout.current_upgrade_info().display());
    copy_file(&source, &layout.current_upgrade_info())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::tests::tar_gz;
    use installer_common::testing::{FakeHost, FakeRemote, FixedSpace};
    use installer_common::{InstallMode, SystemPaths};
    use std::fs;

    fn sandbox(mode: InstallMode) -> (tempfile::TempDir, Configuration, DirectoryLayout) {
        let dir = tempfile::tempdir().unwrap();
        let config = Configuration {
            home_dir: dir.path().join("home/cheqd"),
            paths: SystemPaths::rooted_at(dir.path()),
            mode,
            ..Default::default()
        };
        let layout = DirectoryLayout::from_config(&config);
        fs::create_dir_all(&layout.data).unwrap();
        fs::create_dir_all(&config.paths.install_dir).unwrap();
        (dir, config, layout)
    }

    fn stage(config: &Configuration, content: &[u8]) -> PathBuf {
        fs::create_dir_all(&config.paths.work_dir).unwrap();
        let staged = config.paths.work_dir.join(&config.binary_name);
        fs::write(&staged, content).unwrap();
        staged
    }

    fn cosmovisor_remote(config: &Configuration) -> FakeRemote {
        let remote = FakeRemote::new();
        remote.serve(
            &cosmovisor_url(config, std::env::consts::ARCH),
            tar_gz(&[("CHANGELOG.md", b"log"), ("cosmovisor", b"cv-bin")]),
        );
        remote
    }

    #[test]
    fn test_cosmovisor_url() {
        let config = Configuration::default();
        let url = cosmovisor_url(&config, "x86_64");
        assert!(url.ends_with("cosmovisor%2Fv1.2.0/cosmovisor-v1.2.0-linux-amd64.tar.gz"));
    }

    #[test]
    fn test_standalone_replaces_symlink_and_drops_supervisor() {
        let (_dir, config, layout) = sandbox(InstallMode::Standalone);
        let entry = config.paths.installed_binary("cheqd-noded");
        fs::create_dir_all(layout.cosmovisor_genesis().join("bin")).unwrap();
        fsutil::symlink(&layout.supervised_binary("cheqd-noded"), &entry).unwrap();
        let staged = stage(&config, b"v2");
        let exec = FakeHost::new();
        let remote = FakeRemote::new();
        let host = Host::new(&exec, &remote, &FixedSpace(0));

        install_standalone(host, &config, &layout, &staged).unwrap();

        assert!(!is_symlink(&entry));
        assert_eq!(fs::read(&entry).unwrap(), b"v2");
        assert!(!layout.cosmovisor.exists());
        assert!(exec.ran(&format!("chown root:root {}", entry.display())));
        assert_eq!(detect(&config), BinaryState::StandaloneInstalled);
    }

    #[test]
    fn test_supervised_fresh() {
        let (_dir, config, layout) = sandbox(InstallMode::Supervised);
        let staged = stage(&config, b"v2");
        let exec = FakeHost::new();
        let remote = cosmovisor_remote(&config);
        let host = Host::new(&exec, &remote, &FixedSpace(0));

        install_supervised(host, &config, &layout, &staged).unwrap();

        let entry = config.paths.installed_binary("cheqd-noded");
        assert!(is_symlink(&entry));
        assert_eq!(fs::read_link(&entry).unwrap(), layout.supervised_binary("cheqd-noded"));
        assert_eq!(fs::read(&entry).unwrap(), b"v2");
        assert_eq!(fs::read(config.paths.installed_cosmovisor()).unwrap(), b"cv-bin");
        assert!(!config.paths.work_dir.join("CHANGELOG.md").exists());
        assert!(!staged.exists());
        assert!(exec.ran(&format!("chown -R cheqd:cheqd {}", layout.cosmovisor.display())));
        assert_eq!(detect(&config), BinaryState::SupervisedInstalled);
    }

    #[test]
    fn test_supervised_replaces_real_file() {
        let (_dir, config, layout) = sandbox(InstallMode::Supervised);
        let entry = config.paths.installed_binary("cheqd-noded");
        fs::write(&entry, b"old standalone").unwrap();
        let staged = stage(&config, b"v2");
        let exec = FakeHost::new();
        let remote = cosmovisor_remote(&config);
        let host = Host::new(&exec, &remote, &FixedSpace(0));

        install_supervised(host, &config, &layout, &staged).unwrap();
        assert!(is_symlink(&entry));
        assert_eq!(fs::read(&entry).unwrap(), b"v2");
    }

    #[test]
    fn test_supervised_relinks_foreign_symlink() {
        let (dir, config, layout) = sandbox(InstallMode::Supervised);
        let entry = config.paths.installed_binary("cheqd-noded");
        fsutil::symlink(&dir.path().join("opt/old/cheqd-noded"), &entry).unwrap();
        let staged = stage(&config, b"v2");
        let exec = FakeHost::new();
        let remote = cosmovisor_remote(&config);
        let host = Host::new(&exec, &remote, &FixedSpace(0));

        install_supervised(host, &config, &layout, &staged).unwrap();
        assert_eq!(fs::read_link(&entry).unwrap(), layout.supervised_binary("cheqd-noded"));
        assert_eq!(fs::read(&entry).unwrap(), b"v2");
    }

    #[test]
    fn test_supervised_upgrade_copies_upgrade_info() {
        let (_dir, mut config, layout) = sandbox(InstallMode::Supervised);
        config.upgrade = true;
        fs::write(layout.upgrade_info(), br#"{"name":"v2","height":100}"#).unwrap();
        let staged = stage(&config, b"v2");
        let exec = FakeHost::new();
        let remote = cosmovisor_remote(&config);
        let host = Host::new(&exec, &remote, &FixedSpace(0));

        install_supervised(host, &config, &layout, &staged).unwrap();
        assert_eq!(
            fs::read(layout.current_upgrade_info()).unwrap(),
            fs::read(layout.upgrade_info()).unwrap()
        );
    }

    #[test]
    fn test_layout_init_only_once() {
        let (_dir, _config, layout) = sandbox(InstallMode::Supervised);
        assert!(init_cosmovisor_layout(&layout).unwrap());
        assert!(is_symlink(&layout.cosmovisor_current()));
        assert!(!init_cosmovisor_layout(&layout).unwrap());
    }

    #[test]
    fn test_cosmovisor_download_failure() {
        let (_dir, config, layout) = sandbox(InstallMode::Supervised);
        let staged = stage(&config, b"v2");
        let exec = FakeHost::new();
        let remote = FakeRemote::new();
        let host = Host::new(&exec, &remote, &FixedSpace(0));

        let err = install_supervised(host, &config, &layout, &staged).unwrap_err();
        assert_eq!(err.kind(), installer_common::ErrorKind::Network);
        assert!(staged.exists());
    }
}
