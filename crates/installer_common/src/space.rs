//! Free disk space on the filesystem hosting a path

use crate::error::{InstallError, Result};
use std::io;
use std::path::Path;

pub trait SpaceProbe {
    /// Bytes available to unprivileged writers on the filesystem holding `path`
    fn available_bytes(&self, path: &Path) -> Result<u64>;
}

/// statvfs(3): available blocks × fragment size
#[derive(Debug, Default, Clone, Copy)]
pub struct StatvfsSpace;

impl SpaceProbe for StatvfsSpace {
    fn available_bytes(&self, path: &Path) -> Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path).map_err(|errno| InstallError::Io {
            path: path.to_path_buf(),
            source: io::Error::from_raw_os_error(errno as i32),
        })?;
        Ok((stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64))
    }
}
