//! Snapshot Acquisition Engine
//!
//! Bootstraps chain data from a published snapshot:
//! discovery -> space gate -> cleanup -> download -> checksum -> extract -> restore.
//!
//! Extraction never writes priv_validator_state.json. The validator's own
//! copy, backed up before this phase, is restored afterwards, even when
//! extraction failed part-way.

pub mod checksum;
pub mod discovery;
pub mod extract;

pub use discovery::{discover, SnapshotDescriptor};

use crate::{backup, binary, Host};
use chrono::NaiveDate;
use installer_common::fsutil::{self, ensure_dir, path_exists, remove_path, Owner};
use installer_common::{
    Configuration, DirectoryLayout, InstallError, Result, SpaceProbe, VALIDATOR_STATE_FILE,
};
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

/// What a completed acquisition did
#[derive(Debug, Clone)]
pub struct SnapshotReport {
    pub descriptor: SnapshotDescriptor,
    pub checksum: String,
    pub extracted: extract::ExtractStats,
    pub restored: Vec<PathBuf>,
}

/// Closest existing ancestor, which is what statvfs can measure
fn measurable(path: &Path) -> &Path {
    path.ancestors()
        .find(|p| p.exists())
        .unwrap_or_else(|| Path::new("/"))
}

/// Refuse the download unless the archive is strictly smaller than the free space
pub fn check_space(space: &dyn SpaceProbe, descriptor: &SnapshotDescriptor, dest: &Path) -> Result<u64> {
    let required = descriptor.size.ok_or_else(|| InstallError::UnknownSize {
        url: descriptor.url.clone(),
    })?;
    let available = space.available_bytes(measurable(dest))?;
    if required >= available {
        return Err(InstallError::InsufficientSpace {
            required,
            available,
        });
    }
    info!(
        "Snapshot is {} bytes, {} bytes free on {}",
        required,
        available,
        dest.display()
    );
    Ok(required)
}

/// Drop the live data directory, but only when the validator state is safe in a backup
fn clear_data_dir(layout: &DirectoryLayout) -> Result<()> {
    if !path_exists(&layout.data) {
        return Ok(());
    }
    if backup::has_backup(layout) {
        info!("Removing {} before extraction", layout.data.display());
        remove_path(&layout.data)?;
    } else {
        warn!(
            "No validator-state backup in {}; keeping {} and extracting over it",
            layout.backup.display(),
            layout.data.display()
        );
    }
    Ok(())
}

/// Put backed-up files back and hand the data and supervisor trees to the service user
pub fn restore(host: Host<'_>, config: &Configuration, layout: &DirectoryLayout) -> Result<Vec<PathBuf>> {
    ensure_dir(&layout.data)?;
    let restored = backup::restore_validator_files(layout)?;

    let owner = Owner::service(&config.service_user);
    if config.mode.is_supervised() && path_exists(&layout.cosmovisor) {
        binary::copy_upgrade_info(layout)?;
        fsutil::chown(host.exec, &layout.cosmovisor, &owner, true)?;
    }
    fsutil::chown(host.exec, &layout.data, &owner, true)?;
    Ok(restored)
}

/// Run the whole acquisition. The archive is removed once it has been
/// verified and extracted; a failure to remove it is logged, not returned.
pub fn acquire(
    host: Host<'_>,
    config: &Configuration,
    layout: &DirectoryLayout,
    today: NaiveDate,
) -> Result<SnapshotReport> {
    let template = config.sources.snapshot_template(config.chain);
    let descriptor = discover(host.remote, template, today)?;

    ensure_dir(&layout.root)?;
    check_space(host.space, &descriptor, &layout.root)?;
    if let Err(e) = clear_data_dir(layout) {
        return Err(restore_after(host, config, layout, e));
    }

    let archive = layout.root.join(descriptor.archive_name());
    info!("Downloading snapshot {}", descriptor.url);
    // A failed transfer leaves the partial archive for the next run to resume
    if let Err(e) = host.remote.download(&descriptor.url, &archive) {
        return Err(restore_after(host, config, layout, e));
    }

    let checksum = match checksum::verify(host.remote, &descriptor, &archive) {
        Ok(sum) => sum,
        Err(e) => return Err(restore_after(host, config, layout, e)),
    };

    let extracted = extract::extract_excluding(&archive, &layout.root, &[VALIDATOR_STATE_FILE]);
    if let Err(e) = remove_path(&archive) {
        error!("Could not remove {}: {}", archive.display(), e);
    }

    match extracted {
        Ok(stats) => Ok(SnapshotReport {
            descriptor,
            checksum,
            extracted: stats,
            restored: restore(host, config, layout)?,
        }),
        Err(e) => Err(restore_after(host, config, layout, e)),
    }
}

/// Restore after `cause`, which stays the reported error
fn restore_after(
    host: Host<'_>,
    config: &Configuration,
    layout: &DirectoryLayout,
    cause: InstallError,
) -> InstallError {
    if let Err(e) = restore(host, config, layout) {
        error!("Restoring validator files also failed: {}", e);
    }
    cause
}
