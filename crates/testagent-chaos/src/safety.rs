// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Topology-safety preconditions.
//!
//! Before an action touches the cluster, the injector probes the roles the
//! action could degrade and checks them against the configured floors:
//!
//! - agent-targeting actions need at least `min_ready_agents` ready agents
//! - dbserver-targeting actions need at most `max_down_dbservers` down dbservers
//! - coordinator-targeting actions need at least `min_ready_coordinators` ready coordinators
//! - reboot and remove touch every role on a machine, so all floors must hold;
//!   remove additionally needs a candidate without an agent
//! - add needs the machine count below `max_machines`

use testagent_cluster::{MachineSet, ReadinessError, ReadinessOracle, ReadinessReport, Role};
use testagent_core::ChaosConfig;

use crate::action::ActionKind;

/// Safety floors taken from the chaos configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SafetyLimits {
    /// Ready agents required.
    pub min_ready_agents: usize,
    /// Ready coordinators required.
    pub min_ready_coordinators: usize,
    /// Down dbservers tolerated.
    pub max_down_dbservers: usize,
    /// Machine ceiling for additions.
    pub max_machines: usize,
}

impl From<&ChaosConfig> for SafetyLimits {
    fn from(config: &ChaosConfig) -> Self {
        Self {
            min_ready_agents: config.min_ready_agents,
            min_ready_coordinators: config.min_ready_coordinators,
            max_down_dbservers: config.max_down_dbservers,
            max_machines: config.max_machines,
        }
    }
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self::from(&ChaosConfig::default())
    }
}

/// What an action may do after its preconditions were evaluated.
#[derive(Debug)]
pub enum Eligibility {
    /// The action may target any of these machines.
    Targets(MachineSet),
    /// The action may provision a new machine.
    Provision,
    /// A precondition failed; the reason is for logging.
    Skip(String),
}

impl SafetyLimits {
    /// Returns the reason `report` violates its role's floor, if it does.
    pub fn violation(&self, report: &ReadinessReport) -> Option<String> {
        match report.role {
            Role::Agent if report.ready_count() < self.min_ready_agents => Some(format!(
                "{} ready agents, {} required",
                report.ready_count(),
                self.min_ready_agents
            )),
            Role::DbServer if report.down_count() > self.max_down_dbservers => Some(format!(
                "{} dbservers down, at most {} tolerated",
                report.down_count(),
                self.max_down_dbservers
            )),
            Role::Coordinator if report.ready_count() < self.min_ready_coordinators => {
                Some(format!(
                    "{} ready coordinators, {} required",
                    report.ready_count(),
                    self.min_ready_coordinators
                ))
            }
            _ => None,
        }
    }

    /// Evaluates the preconditions of `kind` against `machines`.
    ///
    /// # Errors
    ///
    /// Returns the oracle's error if a probe could not be carried out.
    pub async fn evaluate(
        &self,
        kind: ActionKind,
        machines: &MachineSet,
        oracle: &ReadinessOracle,
    ) -> Result<Eligibility, ReadinessError> {
        if kind == ActionKind::AddMachine {
            if machines.len() >= self.max_machines {
                return Ok(Eligibility::Skip(format!(
                    "{} machines, ceiling is {}",
                    machines.len(),
                    self.max_machines
                )));
            }
            return Ok(Eligibility::Provision);
        }

        if let Some(role) = kind.role() {
            let report = oracle.probe(machines, role).await?;
            if let Some(reason) = self.violation(&report) {
                return Ok(Eligibility::Skip(reason));
            }
            return Ok(targets(report.ready, format!("no ready {}", role)));
        }

        let topology = oracle.probe_all(machines).await?;
        for role in Role::ALL {
            if let Some(reason) = self.violation(topology.report(role)) {
                return Ok(Eligibility::Skip(reason));
            }
        }

        // Only machines whose every role is currently serving
        let healthy = topology
            .dbservers
            .ready
            .intersection(&topology.coordinators.ready)
            .filter(|m| !m.has_agent() || topology.agents.ready.contains(m.id()));

        match kind {
            ActionKind::RemoveMachine => {
                Ok(targets(healthy.without_agent(), "no healthy machine without an agent".into()))
            }
            _ => Ok(targets(healthy, "no healthy machine".into())),
        }
    }
}

fn targets(candidates: MachineSet, empty_reason: String) -> Eligibility {
    if candidates.is_empty() {
        Eligibility::Skip(empty_reason)
    } else {
        Eligibility::Targets(candidates)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use testagent_cluster::testing::FakeCluster;
    use testagent_cluster::ClusterView;

    use super::*;

    fn oracle() -> ReadinessOracle {
        ReadinessOracle::new(Duration::from_secs(1))
    }

    #[tokio::test]
    async fn test_agent_floor() {
        let cluster = FakeCluster::with_agents_and_extra(1);
        let machines = cluster.machines().await.unwrap();
        let limits = SafetyLimits::default();

        let eligibility =
            limits.evaluate(ActionKind::Kill(Role::Agent), &machines, &oracle()).await.unwrap();
        match eligibility {
            Eligibility::Targets(targets) => assert_eq!(targets.len(), 3),
            other => panic!("expected targets, got {:?}", other),
        }

        cluster.machine("agent-2").unwrap().set_ready(Role::Agent, false);
        let eligibility =
            limits.evaluate(ActionKind::Kill(Role::Agent), &machines, &oracle()).await.unwrap();
        assert!(matches!(eligibility, Eligibility::Skip(_)));
    }

    #[tokio::test]
    async fn test_dbserver_outage_blocks_dbserver_actions() {
        let cluster = FakeCluster::with_agents_and_extra(1);
        let machines = cluster.machines().await.unwrap();
        cluster.machine("worker-1").unwrap().set_ready(Role::DbServer, false);

        let eligibility = SafetyLimits::default()
            .evaluate(ActionKind::Restart(Role::DbServer), &machines, &oracle())
            .await
            .unwrap();
        match eligibility {
            Eligibility::Skip(reason) => assert!(reason.contains("1 dbservers down")),
            other => panic!("expected skip, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_coordinator_targets_are_ready_only() {
        let cluster = FakeCluster::with_agents_and_extra(0);
        let machines = cluster.machines().await.unwrap();
        cluster.machine("agent-1").unwrap().set_ready(Role::Coordinator, false);

        let eligibility = SafetyLimits::default()
            .evaluate(ActionKind::RejectTraffic(Role::Coordinator), &machines, &oracle())
            .await
            .unwrap();
        match eligibility {
            Eligibility::Targets(targets) => assert_eq!(targets.ids(), vec!["agent-2", "agent-3"]),
            other => panic!("expected targets, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_remove_requires_machine_without_agent() {
        let cluster = FakeCluster::with_agents_and_extra(0);
        let machines = cluster.machines().await.unwrap();
        let limits = SafetyLimits::default();

        let eligibility =
            limits.evaluate(ActionKind::RemoveMachine, &machines, &oracle()).await.unwrap();
        assert!(matches!(eligibility, Eligibility::Skip(_)));

        let eligibility =
            limits.evaluate(ActionKind::RebootMachine, &machines, &oracle()).await.unwrap();
        assert!(matches!(eligibility, Eligibility::Targets(t) if t.len() == 3));
    }

    #[tokio::test]
    async fn test_add_respects_ceiling() {
        let cluster = FakeCluster::with_agents_and_extra(2);
        let machines = cluster.machines().await.unwrap();

        let limits = SafetyLimits { max_machines: 5, ..Default::default() };
        let eligibility =
            limits.evaluate(ActionKind::AddMachine, &machines, &oracle()).await.unwrap();
        assert!(matches!(eligibility, Eligibility::Skip(_)));

        let limits = SafetyLimits { max_machines: 6, ..Default::default() };
        let eligibility =
            limits.evaluate(ActionKind::AddMachine, &machines, &oracle()).await.unwrap();
        assert!(matches!(eligibility, Eligibility::Provision));
    }
}
