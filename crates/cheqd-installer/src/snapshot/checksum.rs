//! md5 verification against the published md5sum.txt

use super::discovery::SnapshotDescriptor;
use installer_common::fsutil::remove_path;
use installer_common::{InstallError, IoContext, Remote, Result};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::{error, info};

pub fn md5_file(path: &Path) -> Result<String> {
    let mut file = File::open(path).at(path)?;
    let mut context = md5::Context::new();
    let mut buffer = [0u8; 8192];

    loop {
        let bytes_read = file.read(&mut buffer).at(path)?;
        if bytes_read == 0 {
            break;
        }
        context.consume(&buffer[..bytes_read]);
    }

    Ok(format!("{:x}", context.compute()))
}

/// First field of the last non-empty line, lowercased
pub fn published_checksum(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .find(|line| !line.trim().is_empty())
        .and_then(|line| line.split_whitespace().next())
        .map(str::to_ascii_lowercase)
}

/// Compare the archive to its published checksum. On mismatch the archive is
/// deleted so a later run does not resume onto corrupt bytes.
pub fn verify(remote: &dyn Remote, descriptor: &SnapshotDescriptor, archive: &Path) -> Result<String> {
    let listing = remote.fetch_text(&descriptor.checksum_url)?;
    let expected = published_checksum(&listing).unwrap_or_default();
    let actual = md5_file(archive)?;

    if expected.is_empty() || expected != actual {
        error!(
            "Checksum mismatch for {}: published {:?}, computed {}",
            archive.display(),
            expected,
            actual
        );
        remove_path(archive)?;
        return Err(InstallError::ChecksumMismatch {
            path: archive.to_path_buf(),
            expected,
            actual,
        });
    }

    info!("Snapshot checksum verified ({})", actual);
    Ok(actual)
}
