// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Chaos actions and their outcome counters.

use metrics::counter;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use testagent_cluster::Role;

/// Number of digest bytes in an action id.
const ID_BYTES: usize = 4;

/// The kind of fault an action injects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// Gracefully restart one server of a role.
    Restart(Role),
    /// Kill one server of a role.
    Kill(Role),
    /// Reject all traffic to one server of a role for a while.
    RejectTraffic(Role),
    /// Drop all traffic to one server of a role for a while.
    DropTraffic(Role),
    /// Reboot a whole machine.
    RebootMachine,
    /// Provision an additional machine.
    AddMachine,
    /// Permanently remove a machine that hosts no agent.
    RemoveMachine,
}

impl ActionKind {
    /// Every action the injector knows about.
    pub fn catalog() -> Vec<ActionKind> {
        let mut kinds = Vec::with_capacity(15);
        for role in Role::ALL {
            kinds.push(Self::Restart(role));
        }
        for role in Role::ALL {
            kinds.push(Self::Kill(role));
        }
        for role in Role::ALL {
            kinds.push(Self::RejectTraffic(role));
            kinds.push(Self::DropTraffic(role));
        }
        kinds.extend([Self::RebootMachine, Self::AddMachine, Self::RemoveMachine]);
        kinds
    }

    /// Returns the display name, e.g. `Kill Coordinator`.
    pub fn name(&self) -> String {
        match self {
            Self::Restart(role) => format!("Restart {}", role_title(*role)),
            Self::Kill(role) => format!("Kill {}", role_title(*role)),
            Self::RejectTraffic(role) => format!("Reject {} Traffic", role_title(*role)),
            Self::DropTraffic(role) => format!("Drop {} Traffic", role_title(*role)),
            Self::RebootMachine => "Reboot Machine".to_string(),
            Self::AddMachine => "Add Machine".to_string(),
            Self::RemoveMachine => "Remove Machine".to_string(),
        }
    }

    /// Lowest chaos level at which the action is enabled.
    pub fn min_level(&self) -> u8 {
        match self {
            Self::Restart(_) => 1,
            Self::Kill(_) => 2,
            Self::RejectTraffic(_) | Self::DropTraffic(_) => 3,
            Self::RebootMachine | Self::AddMachine | Self::RemoveMachine => 4,
        }
    }

    /// Role whose safety floor guards the action, if it targets a single role.
    pub fn role(&self) -> Option<Role> {
        match self {
            Self::Restart(role)
            | Self::Kill(role)
            | Self::RejectTraffic(role)
            | Self::DropTraffic(role) => Some(*role),
            Self::RebootMachine | Self::AddMachine | Self::RemoveMachine => None,
        }
    }

    /// Returns true for actions that hold a fault and then restore traffic.
    pub fn is_traffic_hold(&self) -> bool {
        matches!(self, Self::RejectTraffic(_) | Self::DropTraffic(_))
    }
}

fn role_title(role: Role) -> &'static str {
    match role {
        Role::Agent => "Agent",
        Role::DbServer => "DBServer",
        Role::Coordinator => "Coordinator",
    }
}

/// Derives the short, stable id of an action from its name.
pub fn action_id(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    hex::encode(&digest[..ID_BYTES])
}

/// The outcome of one action execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionOutcome {
    /// The fault was injected.
    Succeeded,
    /// The fault could not be injected.
    Failed,
    /// A safety precondition did not hold; nothing was touched.
    Skipped,
}

impl ActionOutcome {
    /// Returns the lowercase outcome name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Default)]
struct ActionState {
    enabled: bool,
    succeeded: u64,
    failed: u64,
    skipped: u64,
}

/// A named, independently toggleable fault.
#[derive(Debug)]
pub struct ChaosAction {
    kind: ActionKind,
    name: String,
    id: String,
    weight: u32,
    state: Mutex<ActionState>,
}

impl ChaosAction {
    /// Creates a disabled action with zeroed counters.
    pub fn new(kind: ActionKind, weight: u32) -> Self {
        let name = kind.name();
        let id = action_id(&name);
        Self { kind, name, id, weight, state: Mutex::new(ActionState::default()) }
    }

    /// Returns the fault kind.
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    /// Returns the display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the name-derived id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the selection weight.
    pub fn weight(&self) -> u32 {
        self.weight
    }

    /// Returns true if the action may be selected.
    pub fn enabled(&self) -> bool {
        self.state.lock().enabled
    }

    pub(crate) fn set_enabled(&self, enabled: bool) {
        self.state.lock().enabled = enabled;
    }

    /// Counts one execution outcome.
    pub fn record(&self, outcome: ActionOutcome) {
        {
            let mut state = self.state.lock();
            match outcome {
                ActionOutcome::Succeeded => state.succeeded += 1,
                ActionOutcome::Failed => state.failed += 1,
                ActionOutcome::Skipped => state.skipped += 1,
            }
        }
        counter!(
            "testagent_chaos_actions_total",
            "action" => self.name.clone(),
            "outcome" => outcome.as_str()
        )
        .increment(1);
    }

    /// Returns a point-in-time copy for reporting.
    pub fn snapshot(&self) -> ActionSnapshot {
        let state = self.state.lock();
        ActionSnapshot {
            name: self.name.clone(),
            id: self.id.clone(),
            level: self.kind.min_level(),
            enabled: state.enabled,
            succeeded: state.succeeded,
            failed: state.failed,
            skipped: state.skipped,
        }
    }
}

/// A read-only view of a [`ChaosAction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionSnapshot {
    /// Display name.
    pub name: String,
    /// Name-derived id.
    pub id: String,
    /// Lowest chaos level enabling the action.
    pub level: u8,
    /// Whether the action may be selected.
    pub enabled: bool,
    /// Executions that injected the fault.
    pub succeeded: u64,
    /// Executions that failed to inject the fault.
    pub failed: u64,
    /// Executions skipped by a safety precondition.
    pub skipped: u64,
}
