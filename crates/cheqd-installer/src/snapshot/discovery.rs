//! Date-window snapshot discovery
//!
//! Snapshots are published under a dated path. Starting today, each day's URL
//! is probed, walking back one day at a time, for today plus at most
//! MAX_SNAPSHOT_DAYS earlier days.

use chrono::{Duration, NaiveDate};
use installer_common::{InstallError, Remote, Result, DATE_TOKEN, MAX_SNAPSHOT_DAYS};
use tracing::{debug, info};

/// Published checksum file, next to the archive
pub const CHECKSUM_FILE: &str = "md5sum.txt";

/// A reachable snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDescriptor {
    pub date: NaiveDate,
    pub url: String,
    /// Content-Length reported by the probe
    pub size: Option<u64>,
    pub checksum_url: String,
}

impl SnapshotDescriptor {
    pub fn archive_name(&self) -> &str {
        self.url.rsplit('/').next().unwrap_or(&self.url)
    }
}

pub fn candidate_url(template: &str, date: NaiveDate) -> String {
    template.replace(DATE_TOKEN, &date.format("%Y-%m-%d").to_string())
}

/// `<dirname(url)>/md5sum.txt`
pub fn checksum_url(url: &str) -> String {
    match url.rsplit_once('/') {
        Some((dir, _)) => format!("{}/{}", dir, CHECKSUM_FILE),
        None => CHECKSUM_FILE.to_string(),
    }
}

/// Probe today, then each earlier day. An HTTP error status moves to the
/// previous day; a transport failure ends discovery.
pub fn discover(remote: &dyn Remote, template: &str, today: NaiveDate) -> Result<SnapshotDescriptor> {
    for offset in 0..=MAX_SNAPSHOT_DAYS {
        let date = today - Duration::days(i64::from(offset));
        let url = candidate_url(template, date);
        let probe = remote.probe(&url)?;
        if probe.is_reachable() {
            info!("Found snapshot for {}: {}", date, url);
            return Ok(SnapshotDescriptor {
                date,
                checksum_url: checksum_url(&url),
                size: probe.content_length,
                url,
            });
        }
        debug!("No snapshot at {} (HTTP {})", url, probe.status);
    }
    Err(InstallError::SnapshotNotFound {
        days: MAX_SNAPSHOT_DAYS,
    })
}
