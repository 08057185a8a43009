// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! In-memory fakes for tests.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::machine::{Machine, MachineError, Role};
use crate::machine_set::MachineSet;
use crate::view::{ClusterError, ClusterView};

#[derive(Debug, Default)]
struct FakeState {
    not_ready: HashSet<Role>,
    failing_probes: HashSet<Role>,
    failing_actions: bool,
    probe_delay: Option<Duration>,
    action_delay: Option<Duration>,
    calls: Vec<String>,
    destroyed: bool,
}

/// A machine that records every mutating call.
///
/// All roles start ready. Probes honor the configured readiness, failure and
/// delay settings.
#[derive(Debug)]
pub struct FakeMachine {
    id: String,
    has_agent: bool,
    state: Mutex<FakeState>,
}

impl FakeMachine {
    /// Creates a ready machine.
    pub fn new(id: impl Into<String>, has_agent: bool) -> Self {
        Self { id: id.into(), has_agent, state: Mutex::new(FakeState::default()) }
    }

    /// Sets whether `role` reports ready.
    pub fn set_ready(&self, role: Role, ready: bool) {
        let mut state = self.state.lock();
        if ready {
            state.not_ready.remove(&role);
        } else {
            state.not_ready.insert(role);
        }
    }

    /// Makes the probe for `role` fail with an error other than "not ready".
    pub fn fail_probe(&self, role: Role, fail: bool) {
        let mut state = self.state.lock();
        if fail {
            state.failing_probes.insert(role);
        } else {
            state.failing_probes.remove(&role);
        }
    }

    /// Makes every mutating action fail.
    pub fn fail_actions(&self, fail: bool) {
        self.state.lock().failing_actions = fail;
    }

    /// Delays every probe.
    pub fn set_probe_delay(&self, delay: Option<Duration>) {
        self.state.lock().probe_delay = delay;
    }

    /// Delays every mutating action.
    pub fn set_action_delay(&self, delay: Option<Duration>) {
        self.state.lock().action_delay = delay;
    }

    /// Returns the recorded mutating calls, e.g. `kill coordinator`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Returns true if any mutating call was made.
    pub fn mutated(&self) -> bool {
        !self.state.lock().calls.is_empty()
    }

    /// Returns true once `destroy` succeeded.
    pub fn is_destroyed(&self) -> bool {
        self.state.lock().destroyed
    }

    async fn act(&self, action: String) -> Result<(), MachineError> {
        let delay = self.state.lock().action_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.calls.push(action.clone());
        if state.failing_actions {
            return Err(MachineError::ActionFailed {
                machine: self.id.clone(),
                action,
                reason: "injected failure".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Machine for FakeMachine {
    fn id(&self) -> &str {
        &self.id
    }

    fn has_agent(&self) -> bool {
        self.has_agent
    }

    async fn test_status(&self, role: Role) -> Result<(), MachineError> {
        let delay = self.state.lock().probe_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let state = self.state.lock();
        if state.destroyed {
            return Err(MachineError::Gone(self.id.clone()));
        }
        if state.failing_probes.contains(&role) {
            return Err(MachineError::ActionFailed {
                machine: self.id.clone(),
                action: format!("probe {}", role),
                reason: "injected failure".to_string(),
            });
        }
        if state.not_ready.contains(&role) {
            return Err(MachineError::NotReady {
                machine: self.id.clone(),
                role,
                reason: "marked not ready".to_string(),
            });
        }
        Ok(())
    }

    async fn kill(&self, role: Role) -> Result<(), MachineError> {
        self.act(format!("kill {}", role)).await
    }

    async fn restart(&self, role: Role) -> Result<(), MachineError> {
        self.act(format!("restart {}", role)).await
    }

    async fn reject_traffic(&self, role: Role) -> Result<(), MachineError> {
        self.act(format!("reject_traffic {}", role)).await
    }

    async fn drop_traffic(&self, role: Role) -> Result<(), MachineError> {
        self.act(format!("drop_traffic {}", role)).await
    }

    async fn accept_traffic(&self, role: Role) -> Result<(), MachineError> {
        self.act(format!("accept_traffic {}", role)).await
    }

    async fn reboot(&self) -> Result<(), MachineError> {
        self.act("reboot".to_string()).await
    }

    async fn destroy(&self) -> Result<(), MachineError> {
        self.act("destroy".to_string()).await?;
        self.state.lock().destroyed = true;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ClusterState {
    machines: Vec<Arc<FakeMachine>>,
    added: usize,
    unavailable: bool,
}

/// A cluster of [`FakeMachine`]s.
///
/// Destroyed machines disappear from [`ClusterView::machines`]. Added
/// machines never host an agent.
#[derive(Debug, Default)]
pub struct FakeCluster {
    state: Mutex<ClusterState>,
}

impl FakeCluster {
    /// Creates a cluster from `(id, has_agent)` pairs.
    pub fn new(specs: &[(&str, bool)]) -> Self {
        let machines =
            specs.iter().map(|(id, agent)| Arc::new(FakeMachine::new(*id, *agent))).collect();
        Self { state: Mutex::new(ClusterState { machines, ..Default::default() }) }
    }

    /// Creates the usual test topology: three agent machines and `extra`
    /// machines without an agent.
    pub fn with_agents_and_extra(extra: usize) -> Self {
        let mut ids: Vec<(String, bool)> =
            (1..=3).map(|i| (format!("agent-{}", i), true)).collect();
        ids.extend((1..=extra).map(|i| (format!("worker-{}", i), false)));
        let specs: Vec<(&str, bool)> = ids.iter().map(|(id, a)| (id.as_str(), *a)).collect();
        Self::new(&specs)
    }

    /// Returns the fake with `id`, including destroyed ones.
    pub fn machine(&self, id: &str) -> Option<Arc<FakeMachine>> {
        self.state.lock().machines.iter().find(|m| m.id() == id).cloned()
    }

    /// Returns every fake, including destroyed ones.
    pub fn fakes(&self) -> Vec<Arc<FakeMachine>> {
        self.state.lock().machines.clone()
    }

    /// Returns the number of machines added through [`ClusterView::add_machine`].
    pub fn added(&self) -> usize {
        self.state.lock().added
    }

    /// Makes [`ClusterView::machines`] fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Returns true if no fake saw a mutating call.
    pub fn untouched(&self) -> bool {
        self.state.lock().machines.iter().all(|m| !m.mutated())
    }
}

#[async_trait]
impl ClusterView for FakeCluster {
    async fn machines(&self) -> Result<MachineSet, ClusterError> {
        let state = self.state.lock();
        if state.unavailable {
            return Err(ClusterError::Unavailable("fake cluster marked unavailable".to_string()));
        }
        Ok(state
            .machines
            .iter()
            .filter(|m| !m.is_destroyed())
            .map(|m| Arc::clone(m) as Arc<dyn Machine>)
            .collect())
    }

    async fn add_machine(&self) -> Result<Arc<dyn Machine>, ClusterError> {
        let mut state = self.state.lock();
        state.added += 1;
        let machine = Arc::new(FakeMachine::new(format!("added-{}", state.added), false));
        state.machines.push(Arc::clone(&machine));
        Ok(machine)
    }
}
