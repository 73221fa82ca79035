//! Directory & Identity Manager
//!
//! Service account and node directory tree. Both operations only create what
//! is missing and never remove data; removal is the pre-install phase's job.

use crate::Change;
use installer_common::fsutil::{self, ensure_dir, path_exists, Owner};
use installer_common::{CommandSpec, Configuration, DirectoryLayout, Executor, IoContext, Result};
use std::fs::OpenOptions;
use tracing::{debug, info};

/// Principal rsyslog writes the log directory as
pub const SYSLOG_USER: &str = "syslog";

pub fn service_account_exists(exec: &dyn Executor, user: &str) -> Result<bool> {
    Ok(exec.run(&CommandSpec::new("id").args(["-u", user]))?.success())
}

fn group_exists(exec: &dyn Executor, group: &str) -> Result<bool> {
    Ok(exec
        .run(&CommandSpec::new("getent").args(["group", group]))?
        .success())
}

/// Create the service group and user (home = configured home dir) if absent
pub fn ensure_service_account(exec: &dyn Executor, config: &Configuration) -> Result<Change> {
    let user = config.service_user.as_str();
    if service_account_exists(exec, user)? {
        info!("User {} already exists, skipping creation", user);
        return Ok(Change::Unchanged);
    }

    if !group_exists(exec, user)? {
        info!("Creating {} group", user);
        exec.run_checked(&CommandSpec::new("addgroup").args([user, "--quiet", "--system"]))?;
    }

    info!("Creating {} user in group {}", user, user);
    let home = config.home_dir.to_string_lossy().to_string();
    exec.run_checked(&CommandSpec::new("adduser").args([
        "--system",
        user,
        "--home",
        home.as_str(),
        "--shell",
        "/bin/bash",
        "--ingroup",
        user,
        "--quiet",
    ]))?;
    Ok(Change::Applied)
}

/// Root dir (service-owned), log dir with an empty stdout.log (syslog-owned),
/// and the /var/log link to the log dir.
pub fn ensure_directory_tree(
    exec: &dyn Executor,
    config: &Configuration,
    layout: &DirectoryLayout,
) -> Result<Change> {
    let service = Owner::service(&config.service_user);
    let mut change = Change::Unchanged;

    if ensure_dir(&layout.root)? {
        info!("Created node root {}", layout.root.display());
        fsutil::chown(exec, &layout.home, &service, false)?;
        fsutil::chown(exec, &layout.root, &service, false)?;
        change = Change::Applied;
    } else {
        debug!("{} already exists", layout.root.display());
    }

    if ensure_dir(&layout.log)? {
        info!("Created log directory {}", layout.log.display());
        let log_file = layout.log_file();
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .at(&log_file)?;
        fsutil::chown(
            exec,
            &layout.log,
            &Owner::new(SYSLOG_USER, &config.service_user),
            true,
        )?;
        change = Change::Applied;
    } else {
        debug!("{} already exists", layout.log.display());
    }

    let link = &config.paths.system_log_link;
    if path_exists(link) {
        debug!("{} already exists, not linking", link.display());
    } else {
        info!("Linking {} -> {}", link.display(), layout.log.display());
        fsutil::symlink(&layout.log, link)?;
        change = Change::Applied;
    }

    Ok(change)
}
