//! Filesystem helpers with explicit precondition checks
//!
//! Every destructive helper checks existence first, so re-running a phase
//! after a crash never fails on "already exists" or "not found".

use crate::error::{IoContext, Result};
use crate::executor::{CommandSpec, Executor};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

/// user:group pair for chown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Owner {
    pub user: String,
    pub group: String,
}

impl Owner {
    pub fn new(user: impl Into<String>, group: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            group: group.into(),
        }
    }

    pub fn root() -> Self {
        Self::new("root", "root")
    }

    /// Service account with its same-named primary group
    pub fn service(user: &str) -> Self {
        Self::new(user, user)
    }
}

impl fmt::Display for Owner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user, self.group)
    }
}

/// True for files, directories and symlinks (dangling ones included)
pub fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

pub fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// Remove a file, symlink or directory tree if present. Returns whether anything was removed.
pub fn remove_path(path: &Path) -> Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(_) => {
            debug!("{} does not exist, nothing to remove", path.display());
            return Ok(false);
        }
    };
    if meta.is_dir() {
        fs::remove_dir_all(path).at(path)?;
    } else {
        fs::remove_file(path).at(path)?;
    }
    warn!("Removed {}", path.display());
    Ok(true)
}

/// Create a directory (and parents) if absent. Returns whether it was created.
pub fn ensure_dir(path: &Path) -> Result<bool> {
    if path.is_dir() {
        return Ok(false);
    }
    fs::create_dir_all(path).at(path)?;
    Ok(true)
}

/// Move a file, falling back to copy + delete across filesystems
pub fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    if fs::rename(src, dest).is_err() {
        fs::copy(src, dest).at(dest)?;
        fs::remove_file(src).at(src)?;
    }
    debug!("Moved {} -> {}", src.display(), dest.display());
    Ok(())
}

/// Copy a file, creating the destination's parent directory
pub fn copy_file(src: &Path, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        ensure_dir(parent)?;
    }
    fs::copy(src, dest).at(dest)
}

#[cfg(unix)]
pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).at(path)
}

#[cfg(unix)]
pub fn symlink(target: &Path, link: &Path) -> Result<()> {
    if let Some(parent) = link.parent() {
        ensure_dir(parent)?;
    }
    std::os::unix::fs::symlink(target, link).at(link)
}

/// chown through the executor so tests can observe ownership changes
pub fn chown(exec: &dyn Executor, path: &Path, owner: &Owner, recursive: bool) -> Result<()> {
    let mut cmd = CommandSpec::new("chown");
    if recursive {
        cmd = cmd.arg("-R");
    }
    let cmd = cmd
        .arg(owner.to_string())
        .arg(path.to_string_lossy().to_string());
    exec.run_checked(&cmd)?;
    Ok(())
}
