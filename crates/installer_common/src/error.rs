//! Error types and exit codes for the installer
//!
//! Every component returns `Result<_, InstallError>`. Whether a failure halts
//! the run is decided by the orchestrator, never by the component.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Exit code for success
pub const EXIT_SUCCESS: i32 = 0;

/// Exit code when a provisioning phase failed
pub const EXIT_PHASE_FAILED: i32 = 1;

/// Exit code when the installer is not running as root
pub const EXIT_NOT_ROOT: i32 = 77;

/// Exit code when the configuration was rejected
pub const EXIT_CONFIG_INVALID: i32 = 78;

/// Exit code after SIGINT
pub const EXIT_INTERRUPTED: i32 = 130;

/// Failure category, used for reporting and exit-code mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unreachable feed, template or snapshot, HTTP error status
    Network,
    /// Downloaded bytes do not match the published checksum
    Integrity,
    /// Not enough disk space, missing release asset or archive entry
    Resource,
    /// Account creation or init-system command failed
    OsState,
    /// A file or directory a phase relies on is missing
    Precondition,
    /// Configuration rejected before any side effect
    Config,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Integrity => "integrity",
            ErrorKind::Resource => "resource",
            ErrorKind::OsState => "os-state",
            ErrorKind::Precondition => "precondition",
            ErrorKind::Config => "config",
        }
    }
}

#[derive(Error, Debug)]
pub enum InstallError {
    #[error("request to {url} failed: {reason}")]
    Network { url: String, reason: String },

    #[error("{url} returned HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    #[error("checksum mismatch for {}: published {expected}, computed {actual}", path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("backup of {} does not match its source", path.display())]
    BackupMismatch { path: PathBuf },

    #[error("insufficient disk space: archive is {required} bytes, {available} bytes free")]
    InsufficientSpace { required: u64, available: u64 },

    #[error("{url} did not report a Content-Length")]
    UnknownSize { url: String },

    #[error("release {version} has no asset named {expected}")]
    AssetNotFound { version: String, expected: String },

    #[error("no snapshot published in the trailing {days} days")]
    SnapshotNotFound { days: u32 },

    #[error("archive {} does not contain {entry}", archive.display())]
    ArchiveEntryMissing { archive: PathBuf, entry: String },

    #[error("release selection {index} is out of range 1..={max}")]
    SelectionOutOfRange { index: usize, max: usize },

    #[error("`{command}` exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("expected {} to exist", path.display())]
    MissingPrecondition { path: PathBuf },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl InstallError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            InstallError::Network { .. }
            | InstallError::HttpStatus { .. }
            | InstallError::UnknownSize { .. }
            | InstallError::SnapshotNotFound { .. }
            | InstallError::Json(_) => ErrorKind::Network,
            InstallError::ChecksumMismatch { .. } | InstallError::BackupMismatch { .. } => {
                ErrorKind::Integrity
            }
            InstallError::InsufficientSpace { .. }
            | InstallError::AssetNotFound { .. }
            | InstallError::ArchiveEntryMissing { .. }
            | InstallError::SelectionOutOfRange { .. } => ErrorKind::Resource,
            InstallError::CommandFailed { .. } | InstallError::Spawn { .. } => ErrorKind::OsState,
            InstallError::MissingPrecondition { .. } | InstallError::Io { .. } => {
                ErrorKind::Precondition
            }
            InstallError::Config(_) => ErrorKind::Config,
        }
    }

    /// Exit code the binary reports for this error
    pub fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::Config => EXIT_CONFIG_INVALID,
            _ => EXIT_PHASE_FAILED,
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallError>;

/// Attach the offending path to an `io::Error`
pub trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for std::result::Result<T, io::Error> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|source| InstallError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })
    }
}
