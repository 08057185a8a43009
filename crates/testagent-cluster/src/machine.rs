// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! The machine capability interface.

use async_trait::async_trait;
use thiserror::Error;

/// A server role hosted on a machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Role {
    /// Consensus agent holding cluster configuration.
    Agent,
    /// Data server holding shards.
    DbServer,
    /// Stateless coordinator serving client requests.
    Coordinator,
}

impl Role {
    /// All roles, in probe order.
    pub const ALL: [Role; 3] = [Role::Agent, Role::DbServer, Role::Coordinator];

    /// Returns the lowercase role name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Agent => "agent",
            Self::DbServer => "dbserver",
            Self::Coordinator => "coordinator",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Errors returned by machine capabilities.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MachineError {
    /// The role's health probe answered but the server is not ready.
    #[error("{role} on {machine} is not ready: {reason}")]
    NotReady {
        /// Machine id.
        machine: String,
        /// Probed role.
        role: Role,
        /// Probe detail.
        reason: String,
    },

    /// A mutating action failed.
    #[error("{action} on {machine} failed: {reason}")]
    ActionFailed {
        /// Machine id.
        machine: String,
        /// Action name, e.g. `kill coordinator`.
        action: String,
        /// Failure detail.
        reason: String,
    },

    /// The machine does not support the requested action.
    #[error("{action} is not supported by {machine}")]
    Unsupported {
        /// Machine id.
        machine: String,
        /// Action name.
        action: String,
    },

    /// The machine handle no longer refers to a live machine.
    #[error("machine {0} is gone")]
    Gone(String),

    /// A probe task terminated abnormally.
    #[error("probe task failed: {0}")]
    ProbeAborted(String),
}

impl MachineError {
    /// Returns true for the non-fatal "probe answered: not ready" outcome.
    pub fn is_not_ready(&self) -> bool {
        matches!(self, Self::NotReady { .. })
    }
}

/// A machine of the cluster under test.
///
/// Identity is stable for the machine's lifetime and role membership never
/// changes after creation. Every machine hosts a dbserver and a coordinator;
/// only some host an agent.
#[async_trait]
pub trait Machine: Send + Sync {
    /// Returns the stable machine identity.
    fn id(&self) -> &str;

    /// Returns true if the machine hosts an agent.
    fn has_agent(&self) -> bool;

    /// Returns true if the machine hosts `role`.
    fn has_role(&self, role: Role) -> bool {
        match role {
            Role::Agent => self.has_agent(),
            Role::DbServer | Role::Coordinator => true,
        }
    }

    /// Probes the role's health endpoint.
    ///
    /// Returns `Ok(())` when ready and [`MachineError::NotReady`] when the
    /// server answered but is not serving. Any other error means the probe
    /// itself could not be carried out.
    async fn test_status(&self, role: Role) -> Result<(), MachineError>;

    /// Kills the role's server process without a graceful shutdown.
    async fn kill(&self, role: Role) -> Result<(), MachineError>;

    /// Gracefully restarts the role's server process.
    async fn restart(&self, role: Role) -> Result<(), MachineError>;

    /// Actively rejects all traffic to the role's server.
    async fn reject_traffic(&self, role: Role) -> Result<(), MachineError>;

    /// Silently drops all traffic to the role's server.
    async fn drop_traffic(&self, role: Role) -> Result<(), MachineError>;

    /// Restores traffic to the role's server.
    async fn accept_traffic(&self, role: Role) -> Result<(), MachineError>;

    /// Reboots the whole machine.
    async fn reboot(&self) -> Result<(), MachineError>;

    /// Removes the machine from the cluster permanently.
    async fn destroy(&self) -> Result<(), MachineError>;
}
