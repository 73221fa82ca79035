//! Release Resolver
//!
//! Reads the GitHub release feed, offers the latest release plus the most
//! recent others for selection, and maps a release onto the asset built for
//! this host: `<binary>-<version sans v>-<os>-<arch>.tar.gz`.

use crate::archive;
use crate::Host;
use installer_common::fsutil::{ensure_dir, remove_path, set_mode};
use installer_common::{Configuration, InstallError, RemoteSources, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// GitHub release information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Release {
    pub tag_name: String,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub assets: Vec<Asset>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub name: String,
    pub browser_download_url: String,
}

impl Release {
    /// Version from tag name (strip 'v' prefix)
    pub fn version(&self) -> &str {
        self.tag_name.strip_prefix('v').unwrap_or(&self.tag_name)
    }

    pub fn expected_asset_name(&self, binary_name: &str, platform: &Platform) -> String {
        format!(
            "{}-{}-{}-{}.tar.gz",
            binary_name,
            self.version(),
            platform.os,
            platform.arch
        )
    }

    /// Download URL of the asset built for `platform`, matched on the URL basename
    pub fn asset_url(&self, binary_name: &str, platform: &Platform) -> Result<&str> {
        let expected = self.expected_asset_name(binary_name, platform);
        self.assets
            .iter()
            .map(|a| a.browser_download_url.as_str())
            .find(|url| url.rsplit('/').next() == Some(expected.as_str()))
            .ok_or_else(|| InstallError::AssetNotFound {
                version: self.tag_name.clone(),
                expected,
            })
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prerelease {
            write!(f, "{} (pre-release)", self.tag_name)
        } else {
            write!(f, "{}", self.tag_name)
        }
    }
}

/// OS name and Go-style architecture used in asset names
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: &str, machine: &str) -> Self {
        Self {
            os: os.to_lowercase(),
            arch: normalize_arch(machine).to_string(),
        }
    }

    pub fn current() -> Self {
        Self::new(std::env::consts::OS, std::env::consts::ARCH)
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.os, self.arch)
    }
}

/// x86_64 is published as amd64; every other machine gets the arm64 build
pub fn normalize_arch(machine: &str) -> &'static str {
    match machine.to_lowercase().as_str() {
        "x86_64" | "amd64" => "amd64",
        _ => "arm64",
    }
}

/// Release listing backed by a `Remote`
pub struct ReleaseFeed<'a> {
    host: Host<'a>,
    sources: &'a RemoteSources,
}

impl<'a> ReleaseFeed<'a> {
    pub fn new(host: Host<'a>, sources: &'a RemoteSources) -> Self {
        Self { host, sources }
    }

    /// Latest stable release
    pub fn latest(&self) -> Result<Release> {
        let body = self.host.remote.fetch_text(&self.sources.latest_release_url())?;
        Ok(serde_json::from_str(&body)?)
    }

    /// All releases, newest first (as the feed orders them)
    pub fn list(&self) -> Result<Vec<Release>> {
        let body = self.host.remote.fetch_text(&self.sources.releases_url)?;
        Ok(serde_json::from_str(&body)?)
    }

    pub fn by_tag(&self, tag: &str) -> Result<Release> {
        let url = format!(
            "{}/tags/{}",
            self.sources.releases_url.trim_end_matches('/'),
            tag
        );
        let body = self.host.remote.fetch_text(&url)?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Latest release first, then up to `n - 1` further releases with the latest removed
    pub fn candidates(&self, n: usize) -> Result<Vec<Release>> {
        let latest = self.latest()?;
        let rest: Vec<Release> = self
            .list()?
            .into_iter()
            .filter(|r| r.tag_name != latest.tag_name)
            .take(n.saturating_sub(1))
            .collect();

        let mut out = Vec::with_capacity(rest.len() + 1);
        out.push(latest);
        out.extend(rest);
        Ok(out)
    }

    /// The configured release, or the latest one
    pub fn resolve(&self, config: &Configuration) -> Result<Release> {
        match &config.release {
            Some(tag) => self.by_tag(tag),
            None => self.latest(),
        }
    }
}

/// 1-based pick from a numbered candidate list
pub fn select(candidates: &[Release], index: usize) -> Result<&Release> {
    if index == 0 || index > candidates.len() {
        return Err(InstallError::SelectionOutOfRange {
            index,
            max: candidates.len(),
        });
    }
    Ok(&candidates[index - 1])
}

/// Download the release asset into the staging dir and unpack the daemon binary.
/// Returns the path of the executable, ready to be installed.
pub fn acquire_binary(
    host: Host<'_>,
    config: &Configuration,
    release: &Release,
    platform: &Platform,
) -> Result<PathBuf> {
    let url = release.asset_url(&config.binary_name, platform)?;
    info!("Downloading {} {}", config.binary_name, release.tag_name);
    debug!("Release asset: {}", url);

    let work_dir = &config.paths.work_dir;
    ensure_dir(work_dir)?;
    let file_name = url.rsplit('/').next().unwrap_or(url);
    let archive_path = work_dir.join(file_name);

    host.remote.download(url, &archive_path)?;
    let binary = archive::unpack_binary(&archive_path, &config.binary_name, work_dir)?;
    remove_path(&archive_path)?;
    set_mode(&binary, 0o755)?;
    Ok(binary)
}
