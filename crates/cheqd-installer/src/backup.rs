//! Validator-state backup
//!
//! priv_validator_state.json and upgrade-info.json are copied to
//! `<home>/backup` before any destructive step and restored after snapshot
//! extraction. The backup lives outside the node root so a fresh install
//! keeps it.

use installer_common::fsutil::{copy_file, ensure_dir, remove_path};
use installer_common::{DirectoryLayout, InstallError, IoContext, Result};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).at(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).at(path)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}

/// Copy and verify the copy byte-for-byte through its digest
pub fn copy_verified(src: &Path, dest: &Path) -> Result<()> {
    copy_file(src, dest)?;
    if sha256_file(src)? != sha256_file(dest)? {
        return Err(InstallError::BackupMismatch {
            path: dest.to_path_buf(),
        });
    }
    Ok(())
}

fn pairs(layout: &DirectoryLayout) -> [(PathBuf, PathBuf); 2] {
    [
        (layout.validator_state(), layout.backup_validator_state()),
        (layout.upgrade_info(), layout.backup_upgrade_info()),
    ]
}

/// Back up whichever validator files exist. Returns the backup paths written.
///
/// An upgrade-info.json saved by an earlier run is dropped when the live one
/// is gone, so it cannot be restored over a snapshot's own. The validator
/// state backup is never dropped: after an interrupted fresh install it is
/// the only copy left.
pub fn backup_validator_files(layout: &DirectoryLayout) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (live, saved) in pairs(layout) {
        if !live.is_file() {
            debug!("{} absent, nothing to back up", live.display());
            if saved == layout.backup_upgrade_info() && remove_path(&saved)? {
                info!("Dropped stale {}", saved.display());
            }
            continue;
        }
        ensure_dir(&layout.backup)?;
        copy_verified(&live, &saved)?;
        info!("Backed up {} to {}", live.display(), saved.display());
        written.push(saved);
    }
    Ok(written)
}

/// A backup exists, so the live data directory may be discarded
pub fn has_backup(layout: &DirectoryLayout) -> bool {
    layout.backup_validator_state().is_file()
}

/// Copy backed-up files into the data directory. Returns the live paths written.
pub fn restore_validator_files(layout: &DirectoryLayout) -> Result<Vec<PathBuf>> {
    let mut restored = Vec::new();
    for (live, saved) in pairs(layout) {
        if !saved.is_file() {
            continue;
        }
        copy_verified(&saved, &live)?;
        info!("Restored {} from backup", live.display());
        restored.push(live);
    }
    Ok(restored)
}
