// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Chaos fault injection for the cluster under test.
//!
//! The [`ChaosMonkey`] repeatedly picks an enabled [`ChaosAction`], checks the
//! topology-safety preconditions guarding it and injects the fault into one
//! randomly chosen eligible machine:
//!
//! - Restarts and kills of agents, dbservers and coordinators
//! - Reject/drop traffic partitions, held for a random duration and then restored
//! - Machine reboots, additions and removals
//!
//! An action whose preconditions fail is *skipped*: it touches nothing and is
//! counted separately from failures. Chaos levels 0 through 4 enable
//! progressively more disruptive actions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod action;
pub mod error;
pub mod monkey;
pub mod registry;
pub mod safety;

pub use action::{action_id, ActionKind, ActionOutcome, ActionSnapshot, ChaosAction};
pub use error::{ChaosError, Result};
pub use monkey::{ChaosMonkey, MonkeyState};
pub use registry::ActionRegistry;
pub use safety::{Eligibility, SafetyLimits};
