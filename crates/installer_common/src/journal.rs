//! Install journal
//!
//! One JSON line per provisioning phase, appended to the journal file
//! (default /var/lib/cheqd-installer/install.jsonl). Journal failures are
//! logged and never fail the run.

use crate::error::{IoContext, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Journal entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallLogEntry {
    /// Timestamp (ISO 8601)
    pub ts: DateTime<Utc>,
    /// Phase name
    pub step: String,
    /// What the phase did ("applied", "skipped", "failed")
    pub action: String,
    pub success: bool,
    /// Details or error message
    pub details: String,
    /// Release tag being installed, once known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
}

impl InstallLogEntry {
    pub fn new(step: &str, action: &str, success: bool, details: impl Into<String>) -> Self {
        Self {
            ts: Utc::now(),
            step: step.to_string(),
            action: action.to_string(),
            success,
            details: details.into(),
            release: None,
        }
    }

    pub fn with_release(mut self, release: Option<&str>) -> Self {
        self.release = release.map(str::to_string);
        self
    }
}

/// Append-only JSONL journal
#[derive(Debug, Clone)]
pub struct Journal {
    path: Option<PathBuf>,
}

impl Journal {
    pub fn open(path: &Path) -> Self {
        Self {
            path: Some(path.to_path_buf()),
        }
    }

    /// Journal that drops every entry
    pub fn disabled() -> Self {
        Self { path: None }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record an entry, logging (not returning) any failure
    pub fn record(&self, entry: &InstallLogEntry) {
        if let Err(e) = self.append(entry) {
            warn!("Could not write install journal: {}", e);
        }
    }

    fn append(&self, entry: &InstallLogEntry) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            create_dir_all(parent).at(parent)?;
        }
        let json = serde_json::to_string(entry)? + "\n";
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .at(path)?;
        file.write_all(json.as_bytes()).at(path)?;
        file.sync_all().at(path)?;
        Ok(())
    }
}
