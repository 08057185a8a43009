// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Cooperative pause/stop check-in points.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::OperationError;

/// Run state of a workload task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Issuing requests.
    Active,
    /// Waiting at the next check-in point.
    Paused,
    /// Finished or asked to finish.
    Stopped,
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => f.write_str("active"),
            Self::Paused => f.write_str("paused"),
            Self::Stopped => f.write_str("stopped"),
        }
    }
}

/// Shared pause/stop switch observed by a workload before every network call.
///
/// Clones share the same switch.
#[derive(Debug, Clone)]
pub struct Gate {
    state: Arc<watch::Sender<RunState>>,
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

impl Gate {
    /// Creates an open gate.
    pub fn new() -> Self {
        let (state, _) = watch::channel(RunState::Active);
        Self { state: Arc::new(state) }
    }

    /// Returns the current state.
    pub fn state(&self) -> RunState {
        *self.state.borrow()
    }

    /// Holds check-ins until resumed. Has no effect once stopped.
    pub fn pause(&self) {
        self.transition(RunState::Paused);
    }

    /// Lets check-ins through again. Has no effect once stopped.
    pub fn resume(&self) {
        self.transition(RunState::Active);
    }

    /// Fails every current and future check-in.
    pub fn stop(&self) {
        self.state.send_replace(RunState::Stopped);
    }

    fn transition(&self, next: RunState) {
        self.state.send_if_modified(|state| {
            if *state == RunState::Stopped || *state == next {
                return false;
            }
            *state = next;
            true
        });
    }

    /// Waits while paused.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Stopped`] once the gate is stopped.
    pub async fn check_in(&self) -> Result<(), OperationError> {
        let mut state = self.state.subscribe();
        let result = match state.wait_for(|s| *s != RunState::Paused).await {
            Ok(current) => *current,
            Err(_) => RunState::Stopped,
        };
        match result {
            RunState::Stopped => Err(OperationError::Stopped),
            _ => Ok(()),
        }
    }

    /// Sleeps for `duration`, waking early on stop.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Stopped`] if the gate stops first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), OperationError> {
        let mut state = self.state.subscribe();
        tokio::select! {
            _ = state.wait_for(|s| *s == RunState::Stopped) => Err(OperationError::Stopped),
            _ = tokio::time::sleep(duration) => Ok(()),
        }
    }
}
