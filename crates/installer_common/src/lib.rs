//! Installer Common - configuration, path model and host capabilities
//!
//! Shared by the cheqd-node provisioning orchestrator and its tests. Nothing in
//! this crate decides whether a run halts; it only reports typed results.

pub mod config;
pub mod error;
pub mod executor;
pub mod fsutil;
pub mod journal;
pub mod layout;
pub mod remote;
pub mod space;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use config::*;
pub use error::{
    ErrorKind, InstallError, IoContext, Result, EXIT_CONFIG_INVALID, EXIT_INTERRUPTED,
    EXIT_NOT_ROOT, EXIT_PHASE_FAILED, EXIT_SUCCESS,
};
pub use executor::{CommandOutput, CommandSpec, Executor, SystemExecutor};
pub use journal::{InstallLogEntry, Journal};
pub use layout::*;
pub use remote::{HttpRemote, Remote, RemoteProbe};
pub use space::{SpaceProbe, StatvfsSpace};
