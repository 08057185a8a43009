// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Concurrent readiness probing.
//!
//! The oracle probes every machine hosting a role at once and joins the
//! results. A probe that answers "not ready" or exceeds the per-probe timeout
//! simply counts as not ready. Any other probe error aborts the remaining
//! probes and is surfaced, along with the number of machines that had
//! already reported ready.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::machine::{Machine, MachineError, Role};
use crate::machine_set::MachineSet;

/// A probe failure that aborted the join.
#[derive(Debug, Error)]
#[error("{role} readiness probe failed ({ready_so_far} ready so far): {source}")]
pub struct ReadinessError {
    /// Probed role.
    pub role: Role,
    /// Machines that had reported ready before the failure.
    pub ready_so_far: usize,
    /// The probe error.
    #[source]
    pub source: MachineError,
}

/// The result of probing one role.
#[derive(Debug, Clone)]
pub struct ReadinessReport {
    /// Probed role.
    pub role: Role,
    /// Machines whose probe succeeded, in probe order.
    pub ready: MachineSet,
    /// Every machine hosting the role.
    pub probed: MachineSet,
}

impl ReadinessReport {
    /// Number of ready machines.
    pub fn ready_count(&self) -> usize {
        self.ready.len()
    }

    /// Machines hosting the role that are not ready.
    pub fn not_ready(&self) -> MachineSet {
        self.probed.difference(&self.ready)
    }

    /// Number of machines hosting the role that are not ready.
    pub fn down_count(&self) -> usize {
        self.probed.len() - self.ready.len()
    }
}

/// Readiness of every role.
#[derive(Debug, Clone)]
pub struct Topology {
    /// Agent readiness.
    pub agents: ReadinessReport,
    /// DB server readiness.
    pub dbservers: ReadinessReport,
    /// Coordinator readiness.
    pub coordinators: ReadinessReport,
}

impl Topology {
    /// Returns the report for `role`.
    pub fn report(&self, role: Role) -> &ReadinessReport {
        match role {
            Role::Agent => &self.agents,
            Role::DbServer => &self.dbservers,
            Role::Coordinator => &self.coordinators,
        }
    }
}

/// Fans out role health probes across a machine set.
#[derive(Debug, Clone)]
pub struct ReadinessOracle {
    probe_timeout: Duration,
}

impl ReadinessOracle {
    /// Creates an oracle bounding each probe by `probe_timeout`.
    pub fn new(probe_timeout: Duration) -> Self {
        Self { probe_timeout }
    }

    /// Returns the per-probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        self.probe_timeout
    }

    /// Probes every machine in `machines` that hosts `role`.
    pub async fn probe(
        &self,
        machines: &MachineSet,
        role: Role,
    ) -> Result<ReadinessReport, ReadinessError> {
        let probed = machines.with_role(role);
        let ready_count = Arc::new(AtomicUsize::new(0));
        let probe_timeout = self.probe_timeout;

        let mut probes = JoinSet::new();
        for machine in probed.iter().cloned() {
            let ready_count = Arc::clone(&ready_count);
            probes.spawn(async move {
                match timeout(probe_timeout, machine.test_status(role)).await {
                    Ok(Ok(())) => {
                        ready_count.fetch_add(1, Ordering::SeqCst);
                        Ok(Some(machine))
                    }
                    Ok(Err(e)) if e.is_not_ready() => {
                        debug!(machine = %machine.id(), role = %role, error = %e, "Machine not ready");
                        Ok(None)
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => {
                        debug!(
                            machine = %machine.id(),
                            role = %role,
                            timeout_ms = probe_timeout.as_millis() as u64,
                            "Readiness probe timed out"
                        );
                        Ok(None)
                    }
                }
            });
        }

        let mut ready: Vec<Arc<dyn Machine>> = Vec::with_capacity(probed.len());
        while let Some(joined) = probes.join_next().await {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => Err(MachineError::ProbeAborted(e.to_string())),
            };
            match outcome {
                Ok(Some(machine)) => ready.push(machine),
                Ok(None) => {}
                Err(source) => {
                    probes.abort_all();
                    let ready_so_far = ready_count.load(Ordering::SeqCst);
                    warn!(role = %role, ready_so_far, error = %source, "Readiness probe failed");
                    return Err(ReadinessError { role, ready_so_far, source });
                }
            }
        }

        let ready = probed.intersection(&MachineSet::new(ready));
        gauge!("testagent_ready_machines", "role" => role.name()).set(ready.len() as f64);
        gauge!("testagent_probed_machines", "role" => role.name()).set(probed.len() as f64);
        debug!(role = %role, ready = ready.len(), probed = probed.len(), "Readiness probed");

        Ok(ReadinessReport { role, ready, probed })
    }

    /// Probes all three roles concurrently.
    pub async fn probe_all(&self, machines: &MachineSet) -> Result<Topology, ReadinessError> {
        let (agents, dbservers, coordinators) = tokio::try_join!(
            self.probe(machines, Role::Agent),
            self.probe(machines, Role::DbServer),
            self.probe(machines, Role::Coordinator),
        )?;
        Ok(Topology { agents, dbservers, coordinators })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeMachine;

    fn machines(fakes: &[Arc<FakeMachine>]) -> MachineSet {
        MachineSet::new(fakes.iter().map(|m| Arc::clone(m) as Arc<dyn Machine>).collect())
    }

    #[tokio::test]
    async fn test_all_ready() {
        let fakes = vec![
            Arc::new(FakeMachine::new("m1", true)),
            Arc::new(FakeMachine::new("m2", true)),
            Arc::new(FakeMachine::new("m3", false)),
        ];
        let oracle = ReadinessOracle::new(Duration::from_secs(1));

        let report = oracle.probe(&machines(&fakes), Role::Agent).await.unwrap();
        assert_eq!(report.ready_count(), 2);
        assert_eq!(report.probed.ids(), vec!["m1", "m2"]);

        let report = oracle.probe(&machines(&fakes), Role::Coordinator).await.unwrap();
        assert_eq!(report.ready_count(), 3);
        assert_eq!(report.down_count(), 0);
    }

    #[tokio::test]
    async fn test_not_ready_is_counted_not_failed() {
        let fakes = vec![
            Arc::new(FakeMachine::new("m1", true)),
            Arc::new(FakeMachine::new("m2", true)),
        ];
        fakes[1].set_ready(Role::DbServer, false);

        let oracle = ReadinessOracle::new(Duration::from_secs(1));
        let report = oracle.probe(&machines(&fakes), Role::DbServer).await.unwrap();

        assert_eq!(report.ready.ids(), vec!["m1"]);
        assert_eq!(report.not_ready().ids(), vec!["m2"]);
        assert_eq!(report.down_count(), 1);
    }

    #[tokio::test]
    async fn test_probe_timeout_counts_as_not_ready() {
        let fakes = vec![
            Arc::new(FakeMachine::new("m1", true)),
            Arc::new(FakeMachine::new("m2", true)),
        ];
        fakes[0].set_probe_delay(Some(Duration::from_secs(10)));

        let oracle = ReadinessOracle::new(Duration::from_millis(50));
        let report = oracle.probe(&machines(&fakes), Role::Coordinator).await.unwrap();

        assert_eq!(report.ready.ids(), vec!["m2"]);
    }

    #[tokio::test]
    async fn test_probe_error_aborts_join() {
        let fakes = vec![
            Arc::new(FakeMachine::new("m1", true)),
            Arc::new(FakeMachine::new("m2", true)),
            Arc::new(FakeMachine::new("m3", true)),
        ];
        fakes[1].set_probe_delay(Some(Duration::from_millis(100)));
        fakes[1].fail_probe(Role::Agent, true);
        fakes[2].set_probe_delay(Some(Duration::from_secs(30)));

        let oracle = ReadinessOracle::new(Duration::from_secs(60));
        let started = std::time::Instant::now();
        let error = oracle.probe(&machines(&fakes), Role::Agent).await.unwrap_err();

        assert_eq!(error.role, Role::Agent);
        assert_eq!(error.ready_so_far, 1);
        assert!(matches!(error.source, MachineError::ActionFailed { .. }));
        // The slow probe was aborted rather than awaited
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_probe_all() {
        let fakes = vec![
            Arc::new(FakeMachine::new("m1", true)),
            Arc::new(FakeMachine::new("m2", false)),
        ];
        fakes[1].set_ready(Role::Coordinator, false);

        let oracle = ReadinessOracle::new(Duration::from_secs(1));
        let topology = oracle.probe_all(&machines(&fakes)).await.unwrap();

        assert_eq!(topology.agents.ready_count(), 1);
        assert_eq!(topology.dbservers.ready_count(), 2);
        assert_eq!(topology.report(Role::Coordinator).ready.ids(), vec!["m1"]);
    }

    #[tokio::test]
    async fn test_empty_set() {
        let oracle = ReadinessOracle::new(Duration::from_secs(1));
        let report = oracle.probe(&MachineSet::default(), Role::Agent).await.unwrap();
        assert_eq!(report.ready_count(), 0);
        assert!(report.probed.is_empty());
    }
}
