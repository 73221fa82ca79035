//! .tar.lz4 extraction into the node root

use installer_common::{IoContext, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractStats {
    pub unpacked: usize,
    pub skipped: usize,
}

/// Unpack `archive` under `dest`, skipping entries whose file name is in
/// `excluded`. Entries escaping `dest` are refused by `unpack_in`.
pub fn extract_excluding(archive: &Path, dest: &Path, excluded: &[&str]) -> Result<ExtractStats> {
    info!("Extracting {} into {}", archive.display(), dest.display());
    let file = File::open(archive).at(archive)?;
    let decoder = lz4_flex::frame::FrameDecoder::new(BufReader::new(file));
    let mut tar = tar::Archive::new(decoder);
    let mut stats = ExtractStats::default();

    for entry in tar.entries().at(archive)? {
        let mut entry = entry.at(archive)?;
        let path = entry.path().at(archive)?.into_owned();

        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if excluded.contains(&name) {
            debug!("Skipping {}", path.display());
            stats.skipped += 1;
            continue;
        }

        if entry.unpack_in(dest).at(dest.join(&path))? {
            stats.unpacked += 1;
        } else {
            warn!("Refusing to unpack {} outside {}", path.display(), dest.display());
            stats.skipped += 1;
        }
    }

    info!(
        "Extracted {} entries ({} skipped)",
        stats.unpacked, stats.skipped
    );
    Ok(stats)
}
