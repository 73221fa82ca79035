//! Remote - HTTP access to the release feed, templates and snapshots
//!
//! `HttpRemote` uses a blocking reqwest client: the installer is strictly
//! sequential, every phase waits for its transfer before the next begins.
//! Nothing here retries; a failed request is terminal for the run.

use crate::error::{InstallError, IoContext, Result};
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// Timeout for API calls, probes and small text files
const API_TIMEOUT_SECS: u64 = 30;

/// Connect timeout for long transfers (which have no total timeout)
const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Result of a HEAD probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteProbe {
    pub status: u16,
    pub content_length: Option<u64>,
}

impl RemoteProbe {
    pub fn is_reachable(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Read-only access to remote resources
pub trait Remote {
    /// HEAD the URL (following redirects). HTTP error statuses are data, not errors.
    fn probe(&self, url: &str) -> Result<RemoteProbe>;

    /// GET a small text resource; non-2xx is an error
    fn fetch_text(&self, url: &str) -> Result<String>;

    /// GET into `dest`, resuming when `dest` already holds a prefix.
    /// Returns the final size of `dest`.
    fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

fn network_error(url: &str) -> impl FnOnce(reqwest::Error) -> InstallError + '_ {
    move |e| InstallError::Network {
        url: url.to_string(),
        reason: e.to_string(),
    }
}

/// Remote backed by reqwest
pub struct HttpRemote {
    api: Client,
    transfer: Client,
}

impl HttpRemote {
    pub fn new() -> Result<Self> {
        let user_agent = format!("cheqd-installer/{}", env!("CARGO_PKG_VERSION"));
        let api = Client::builder()
            .user_agent(user_agent.clone())
            .timeout(Duration::from_secs(API_TIMEOUT_SECS))
            .build()
            .map_err(network_error("client"))?;
        let transfer = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(None::<Duration>)
            .build()
            .map_err(network_error("client"))?;
        Ok(Self { api, transfer })
    }

    fn progress_bar(total: Option<u64>, position: u64) -> ProgressBar {
        let bar = match total {
            Some(len) => {
                let bar = ProgressBar::new(len);
                bar.set_style(
                    ProgressStyle::with_template(
                        "{bytes}/{total_bytes} [{wide_bar}] {bytes_per_sec} eta {eta}",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("=> "),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(ProgressStyle::default_spinner());
                bar
            }
        };
        bar.set_position(position);
        bar
    }
}

impl Remote for HttpRemote {
    fn probe(&self, url: &str) -> Result<RemoteProbe> {
        debug!("Probing {}", url);
        let response = self.api.head(url).send().map_err(network_error(url))?;
        let content_length = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        Ok(RemoteProbe {
            status: response.status().as_u16(),
            content_length,
        })
    }

    fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("Fetching {}", url);
        let response = self
            .api
            .get(url)
            .header("Accept", "application/vnd.github.v3+json, text/plain, */*")
            .send()
            .map_err(network_error(url))?;
        if !response.status().is_success() {
            return Err(InstallError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.text().map_err(network_error(url))
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let existing = fs::metadata(dest).map(|m| m.len()).unwrap_or(0);
        let mut request = self.transfer.get(url);
        if existing > 0 {
            info!("Resuming {} from byte {}", url, existing);
            request = request.header(RANGE, format!("bytes={}-", existing));
        }

        let response = request.send().map_err(network_error(url))?;
        let status = response.status().as_u16();
        let (mut file, offset): (File, u64) = match status {
            206 => (OpenOptions::new().append(true).open(dest).at(dest)?, existing),
            416 if existing > 0 => {
                info!("{} already fully downloaded", dest.display());
                return Ok(existing);
            }
            s if (200..300).contains(&s) => (File::create(dest).at(dest)?, 0),
            s => {
                return Err(InstallError::HttpStatus {
                    url: url.to_string(),
                    status: s,
                })
            }
        };

        let bar = Self::progress_bar(response.content_length().map(|len| len + offset), offset);
        let mut reader = bar.wrap_read(response);
        let written = io::copy(&mut reader, &mut file).map_err(|e| InstallError::Network {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        bar.finish_and_clear();

        file.sync_all().at(dest)?;
        Ok(offset + written)
    }
}
