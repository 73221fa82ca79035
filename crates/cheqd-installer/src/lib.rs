//! cheqd-installer - provisioning orchestrator for cheqd-node hosts
//!
//! Acquires the release binary, prepares the service account and directory
//! tree, installs the daemon standalone or under cosmovisor, wires up systemd
//! units and logging, and optionally bootstraps chain state from a snapshot.
//! Every phase checks its preconditions first, so a crashed run can simply be
//! started again.

pub mod archive;
pub mod backup;
pub mod binary;
pub mod environment;
pub mod identity;
pub mod node_config;
pub mod orchestrator;
pub mod release;
pub mod snapshot;
pub mod templates;
pub mod units;

use installer_common::{Executor, Remote, SpaceProbe};

pub use orchestrator::{Orchestrator, Phase, PhaseFailure, PhaseOutcome, PlannedPhase, ProvisionReport};

/// Outcome of an idempotent operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Host state was modified
    Applied,
    /// Desired state already held; nothing was touched
    Unchanged,
}

impl Change {
    pub fn applied(&self) -> bool {
        matches!(self, Change::Applied)
    }

    /// Applied if either side applied
    pub fn merge(self, other: Change) -> Change {
        if self.applied() || other.applied() {
            Change::Applied
        } else {
            Change::Unchanged
        }
    }
}

/// Host capabilities handed to every phase
#[derive(Clone, Copy)]
pub struct Host<'a> {
    pub exec: &'a dyn Executor,
    pub remote: &'a dyn Remote,
    pub space: &'a dyn SpaceProbe,
}

impl<'a> Host<'a> {
    pub fn new(exec: &'a dyn Executor, remote: &'a dyn Remote, space: &'a dyn SpaceProbe) -> Self {
        Self {
            exec,
            remote,
            space,
        }
    }
}
