//! Single-binary extraction from .tar.gz release assets
//!
//! Release and cosmovisor archives ship a README, LICENSE and CHANGELOG next
//! to the executable. Only the named binary is written out.

use flate2::read::GzDecoder;
use installer_common::{InstallError, IoContext, Result};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;
use tracing::debug;

/// Extract the regular file named `binary_name` (at any depth) from a gzip'd
/// tarball into `dest_dir/<binary_name>`.
pub fn unpack_binary(archive: &Path, binary_name: &str, dest_dir: &Path) -> Result<PathBuf> {
    let file = File::open(archive).at(archive)?;
    unpack_from_reader(GzDecoder::new(file), archive, binary_name, dest_dir)
}

fn unpack_from_reader<R: Read>(
    reader: R,
    archive: &Path,
    binary_name: &str,
    dest_dir: &Path,
) -> Result<PathBuf> {
    let mut tarball = Archive::new(reader);
    let dest = dest_dir.join(binary_name);

    for entry in tarball.entries().at(archive)? {
        let mut entry = entry.at(archive)?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .at(archive)?
            .file_name()
            .map(|name| name == binary_name)
            .unwrap_or(false);
        if matches {
            entry.unpack(&dest).at(&dest)?;
            debug!("Unpacked {} from {}", binary_name, archive.display());
            return Ok(dest);
        }
    }

    Err(InstallError::ArchiveEntryMissing {
        archive: archive.to_path_buf(),
        entry: binary_name.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs;

    /// Build a .tar.gz holding `files` (path, contents)
    pub(crate) fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
        let encoder = GzEncoder::new(Vec::new(), Compression::fast());
        let mut builder = tar::Builder::new(encoder);
        for (path, data) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder.append_data(&mut header, path, *data).unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap()
    }

    #[test]
    fn test_unpacks_only_the_binary() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("cheqd-noded.tar.gz");
        fs::write(
            &archive,
            tar_gz(&[
                ("README.md", b"readme"),
                ("cheqd-noded", b"\x7fELF"),
                ("LICENSE", b"apache"),
            ]),
        )
        .unwrap();

        let out = unpack_binary(&archive, "cheqd-noded", dir.path()).unwrap();
        assert_eq!(fs::read(out).unwrap(), b"\x7fELF");
        assert!(!dir.path().join("README.md").exists());
        assert!(!dir.path().join("LICENSE").exists());
    }

    #[test]
    fn test_nested_entry_is_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("cosmovisor.tar.gz");
        fs::write(&archive, tar_gz(&[("bin/cosmovisor", b"cv")])).unwrap();

        let out = unpack_binary(&archive, "cosmovisor", dir.path()).unwrap();
        assert_eq!(out, dir.path().join("cosmovisor"));
    }

    #[test]
    fn test_missing_binary_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("empty.tar.gz");
        fs::write(&archive, tar_gz(&[("README.md", b"readme")])).unwrap();

        let err = unpack_binary(&archive, "cheqd-noded", dir.path()).unwrap_err();
        assert!(matches!(err, InstallError::ArchiveEntryMissing { .. }));
    }
}
