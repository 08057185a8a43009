// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! The chaos fault injector.
//!
//! The injector loops through selecting an enabled action, evaluating its
//! safety preconditions, executing it against a random eligible machine and
//! cooling down. Only one action executes at a time. Stopping cancels the
//! cooldown and any in-flight traffic hold promptly; held traffic is always
//! restored before the loop exits.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metrics::gauge;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use testagent_cluster::{ClusterView, Machine, MachineError, ReadinessOracle, Role};
use testagent_core::config::MAX_CHAOS_LEVEL;
use testagent_core::{ChaosConfig, Event, EventLog};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::action::{ActionKind, ActionOutcome, ActionSnapshot, ChaosAction};
use crate::error::{ChaosError, Result};
use crate::registry::ActionRegistry;
use crate::safety::{Eligibility, SafetyLimits};

/// Injector loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonkeyState {
    /// Never started.
    Idle,
    /// Picking the next action.
    SelectingAction,
    /// Probing readiness for the chosen action.
    EvaluatingPreconditions,
    /// Injecting the fault.
    Executing,
    /// Waiting before the next action.
    Cooldown,
    /// Stopped after having run.
    Stopped,
}

impl MonkeyState {
    /// Returns true while the loop is running.
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }
}

struct Inner {
    cluster: Arc<dyn ClusterView>,
    oracle: ReadinessOracle,
    registry: ActionRegistry,
    limits: SafetyLimits,
    config: ChaosConfig,
    events: EventLog,
    rng: Mutex<StdRng>,
    level: AtomicU8,
    state: watch::Sender<MonkeyState>,
    cancel: Mutex<CancellationToken>,
    // Serializes executions from the loop and from `run_action`
    executing: tokio::sync::Mutex<()>,
}

/// The chaos fault injector.
///
/// Cloning yields another handle to the same injector.
#[derive(Clone)]
pub struct ChaosMonkey {
    inner: Arc<Inner>,
}

impl ChaosMonkey {
    /// Creates an injector over `cluster`. Nothing runs until [`start`](Self::start).
    pub fn new(cluster: Arc<dyn ClusterView>, config: ChaosConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let level = config.level.min(MAX_CHAOS_LEVEL);
        let (state, _) = watch::channel(MonkeyState::Idle);
        gauge!("testagent_chaos_level").set(level as f64);

        Self {
            inner: Arc::new(Inner {
                cluster,
                oracle: ReadinessOracle::new(config.probe_timeout()),
                registry: ActionRegistry::new(&config),
                limits: SafetyLimits::from(&config),
                events: EventLog::new(config.event_capacity),
                rng: Mutex::new(rng),
                level: AtomicU8::new(level),
                state,
                cancel: Mutex::new(CancellationToken::new()),
                executing: tokio::sync::Mutex::new(()),
                config,
            }),
        }
    }

    /// Starts the injector loop.
    ///
    /// # Errors
    ///
    /// Returns [`ChaosError::AlreadyActive`] if the loop is running.
    pub fn start(&self) -> Result<()> {
        if self.active() {
            return Err(ChaosError::AlreadyActive);
        }
        let cancel = self.inner.cancel_token();
        self.inner.state.send_replace(MonkeyState::SelectingAction);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let _stopped = StoppedOnExit(Arc::clone(&inner));
            inner.run(cancel).await;
        });

        info!(level = self.level(), "Chaos monkey started");
        Ok(())
    }

    /// Stops the injector and waits until the loop has exited.
    ///
    /// An in-flight traffic hold ends promptly and its traffic is restored
    /// before this returns.
    pub async fn stop(&self) {
        self.inner.cancel.lock().cancel();
        self.wait_until_inactive().await;
        info!("Chaos monkey stopped");
    }

    /// Waits until the loop is not running.
    pub async fn wait_until_inactive(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives in `inner`, so the channel cannot close while we hold `self`
        let _ = state.wait_for(|s| !s.is_active()).await;
    }

    /// Returns true while the loop is running.
    pub fn active(&self) -> bool {
        self.state().is_active()
    }

    /// Returns the current loop state.
    pub fn state(&self) -> MonkeyState {
        *self.inner.state.borrow()
    }

    /// Returns the current chaos level.
    pub fn level(&self) -> u8 {
        self.inner.level.load(Ordering::SeqCst)
    }

    /// Sets the chaos level, enabling exactly the actions at or below it.
    pub fn set_level(&self, level: u8) -> Result<()> {
        self.inner.registry.set_level(level)?;
        self.inner.level.store(level, Ordering::SeqCst);
        gauge!("testagent_chaos_level").set(level as f64);
        info!(level, "Chaos level changed");
        Ok(())
    }

    /// Enables an action by id or name.
    pub fn enable(&self, id: &str) -> Result<()> {
        self.inner.registry.enable(id)
    }

    /// Disables an action by id or name. An in-flight execution completes.
    pub fn disable(&self, id: &str) -> Result<()> {
        self.inner.registry.disable(id)
    }

    /// Returns snapshots of every action.
    pub fn actions(&self) -> Vec<ActionSnapshot> {
        self.inner.registry.list()
    }

    /// Returns up to `max` events, most recent first.
    pub fn recent_events(&self, max: usize) -> Vec<Event> {
        self.inner.events.recent(max)
    }

    /// Runs one action by id or name through the usual precondition and
    /// execution path, regardless of whether it is enabled.
    pub async fn run_action(&self, id: &str) -> Result<ActionOutcome> {
        let action = self
            .inner
            .registry
            .find(id)
            .ok_or_else(|| ChaosError::UnknownAction(id.to_string()))?;
        let cancel = self.inner.cancel_token();
        Ok(self.inner.execute(&action, &cancel, false).await)
    }
}

impl std::fmt::Debug for ChaosMonkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChaosMonkey")
            .field("state", &self.state())
            .field("level", &self.level())
            .finish()
    }
}

/// Marks the injector stopped when the loop task exits, even by panic.
struct StoppedOnExit(Arc<Inner>);

impl Drop for StoppedOnExit {
    fn drop(&mut self) {
        self.0.state.send_replace(MonkeyState::Stopped);
    }
}

impl Inner {
    /// Returns the live cancellation token, replacing a spent one.
    fn cancel_token(&self) -> CancellationToken {
        let mut cancel = self.cancel.lock();
        if cancel.is_cancelled() {
            *cancel = CancellationToken::new();
        }
        cancel.clone()
    }

    fn set_state(&self, state: MonkeyState) {
        self.state.send_replace(state);
    }

    async fn run(&self, cancel: CancellationToken) {
        let interval = self.config.action_interval_duration();
        loop {
            if cancel.is_cancelled() {
                break;
            }

            self.set_state(MonkeyState::SelectingAction);
            let selected = self.registry.select(&mut *self.rng.lock());
            match selected {
                Some(action) => {
                    self.execute(&action, &cancel, true).await;
                }
                None => debug!(level = self.level.load(Ordering::SeqCst), "No chaos action enabled"),
            }

            self.set_state(MonkeyState::Cooldown);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    async fn execute(
        &self,
        action: &ChaosAction,
        cancel: &CancellationToken,
        track_state: bool,
    ) -> ActionOutcome {
        let _executing = self.executing.lock().await;
        if track_state {
            self.set_state(MonkeyState::EvaluatingPreconditions);
        }

        let eligibility = match self.cluster.machines().await {
            Ok(machines) => {
                self.limits.evaluate(action.kind(), &machines, &self.oracle).await.map_err(|e| {
                    format!("readiness unknown: {}", e)
                })
            }
            Err(e) => Err(format!("machine inventory unavailable: {}", e)),
        };

        let targets = match eligibility {
            Ok(Eligibility::Skip(reason)) | Err(reason) => {
                action.record(ActionOutcome::Skipped);
                info!(action = %action.name(), reason = %reason, "Skipping chaos action");
                return ActionOutcome::Skipped;
            }
            Ok(eligibility) => eligibility,
        };

        if track_state {
            self.set_state(MonkeyState::Executing);
        }

        let outcome = match targets {
            Eligibility::Targets(machines) => {
                let chosen = machines.choose(&mut *self.rng.lock());
                match chosen {
                    Some(machine) => self.inject(action, machine, cancel).await,
                    None => ActionOutcome::Skipped,
                }
            }
            Eligibility::Provision => self.provision(action).await,
            Eligibility::Skip(_) => ActionOutcome::Skipped,
        };

        action.record(outcome);
        outcome
    }

    async fn inject(
        &self,
        action: &ChaosAction,
        machine: Arc<dyn Machine>,
        cancel: &CancellationToken,
    ) -> ActionOutcome {
        let name = action.name();
        let id = machine.id().to_string();
        self.events.record(format!("Starting {} on {}", name, id));
        info!(action = %name, machine = %id, "Executing chaos action");

        let kind = action.kind();
        let result = match kind {
            ActionKind::Restart(role) => machine.restart(role).await,
            ActionKind::Kill(role) => machine.kill(role).await,
            ActionKind::RejectTraffic(role) => machine.reject_traffic(role).await,
            ActionKind::DropTraffic(role) => machine.drop_traffic(role).await,
            ActionKind::RebootMachine => machine.reboot().await,
            ActionKind::RemoveMachine => machine.destroy().await,
            ActionKind::AddMachine => Err(MachineError::Unsupported {
                machine: id.clone(),
                action: name.to_string(),
            }),
        };

        if let (true, Some(role)) = (kind.is_traffic_hold(), kind.role()) {
            self.hold_and_restore(&machine, role, result.is_ok(), cancel).await;
        }

        self.finish(name, &id, result.map_err(|e| e.to_string()))
    }

    async fn provision(&self, action: &ChaosAction) -> ActionOutcome {
        let name = action.name();
        self.events.record(format!("Starting {} on new machine", name));
        info!(action = %name, "Executing chaos action");

        match self.cluster.add_machine().await {
            Ok(machine) => self.finish(name, machine.id(), Ok(())),
            Err(e) => self.finish(name, "new machine", Err(e.to_string())),
        }
    }

    fn finish(
        &self,
        name: &str,
        machine: &str,
        result: std::result::Result<(), String>,
    ) -> ActionOutcome {
        match result {
            Ok(()) => {
                self.events.record(format!("{} on {} succeeded", name, machine));
                info!(action = %name, machine = %machine, "Chaos action succeeded");
                ActionOutcome::Succeeded
            }
            Err(e) => {
                self.events.record(format!("{} on {} failed: {}", name, machine, e));
                error!(action = %name, machine = %machine, error = %e, "Chaos action failed");
                ActionOutcome::Failed
            }
        }
    }

    /// Holds a traffic fault for a random duration, then restores traffic.
    ///
    /// The hold ends early on cancellation and is skipped when the fault was
    /// never injected. Restoration always runs; its failure is logged and
    /// does not change the action's outcome.
    async fn hold_and_restore(
        &self,
        machine: &Arc<dyn Machine>,
        role: Role,
        injected: bool,
        cancel: &CancellationToken,
    ) {
        if injected {
            let hold = self.hold_duration();
            debug!(
                machine = %machine.id(),
                role = %role,
                hold_ms = hold.as_millis() as u64,
                "Holding traffic fault"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(machine = %machine.id(), role = %role, "Traffic hold cancelled");
                }
                _ = tokio::time::sleep(hold) => {}
            }
        } else {
            debug!(machine = %machine.id(), role = %role, "Injection failed, restoring without hold");
        }

        if let Err(e) = machine.accept_traffic(role).await {
            warn!(machine = %machine.id(), role = %role, error = %e, "Failed to restore traffic");
        }
    }

    fn hold_duration(&self) -> Duration {
        let min = self.config.hold_min();
        let max = self.config.hold_max().max(min);
        self.rng.lock().gen_range(min..=max)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use testagent_cluster::testing::FakeCluster;

    use super::*;

    fn config() -> ChaosConfig {
        ChaosConfig::default()
            .seed(42)
            .level(0)
            .action_interval(Duration::from_millis(10))
            .hold_range(Duration::from_millis(10), Duration::from_millis(20))
    }

    fn monkey(cluster: &Arc<FakeCluster>, config: ChaosConfig) -> ChaosMonkey {
        ChaosMonkey::new(Arc::clone(cluster) as Arc<dyn ClusterView>, config)
    }

    #[tokio::test]
    async fn test_kill_coordinator_with_two_ready() {
        let cluster = Arc::new(FakeCluster::new(&[("m1", true), ("m2", true), ("m3", true)]));
        cluster.machine("m3").unwrap().set_ready(Role::Coordinator, false);
        let monkey = monkey(&cluster, config());

        let outcome = monkey.run_action("Kill Coordinator").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Succeeded);

        let killed: Vec<_> = cluster
            .fakes()
            .into_iter()
            .filter(|m| m.calls() == vec!["kill coordinator".to_string()])
            .map(|m| m.id().to_string())
            .collect();
        assert_eq!(killed.len(), 1);
        assert_ne!(killed[0], "m3");

        let snapshot = monkey.actions().into_iter().find(|a| a.name == "Kill Coordinator").unwrap();
        assert_eq!((snapshot.succeeded, snapshot.failed, snapshot.skipped), (1, 0, 0));

        let events = monkey.recent_events(10);
        assert_eq!(events.len(), 2);
        assert!(events[1].description.starts_with("Starting Kill Coordinator on"));
        assert!(events[0].description.ends_with("succeeded"));
        assert!(events[0].description.contains(&killed[0]));
    }

    #[tokio::test]
    async fn test_kill_coordinator_with_one_ready_skips() {
        let cluster = Arc::new(FakeCluster::new(&[("m1", true), ("m2", true), ("m3", true)]));
        cluster.machine("m2").unwrap().set_ready(Role::Coordinator, false);
        cluster.machine("m3").unwrap().set_ready(Role::Coordinator, false);
        let monkey = monkey(&cluster, config());

        let outcome = monkey.run_action("Kill Coordinator").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Skipped);
        assert!(cluster.untouched());
        assert!(monkey.recent_events(10).is_empty());

        let snapshot = monkey.actions().into_iter().find(|a| a.name == "Kill Coordinator").unwrap();
        assert_eq!((snapshot.succeeded, snapshot.failed, snapshot.skipped), (0, 0, 1));
    }

    #[tokio::test]
    async fn test_failed_action_counts_failure() {
        let cluster = Arc::new(FakeCluster::new(&[("m1", true), ("m2", true), ("m3", true)]));
        for machine in cluster.fakes() {
            machine.fail_actions(true);
        }
        let monkey = monkey(&cluster, config());

        let outcome = monkey.run_action("Restart Agent").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Failed);

        let snapshot = monkey.actions().into_iter().find(|a| a.name == "Restart Agent").unwrap();
        assert_eq!((snapshot.succeeded, snapshot.failed, snapshot.skipped), (0, 1, 0));
        assert!(monkey.recent_events(1)[0].description.contains("failed: "));
    }

    #[tokio::test]
    async fn test_traffic_action_restores() {
        let cluster = Arc::new(FakeCluster::new(&[("m1", true), ("m2", true), ("m3", true)]));
        let monkey = monkey(&cluster, config());

        let outcome = monkey.run_action("Drop DBServer Traffic").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Succeeded);

        let touched: Vec<_> = cluster.fakes().into_iter().filter(|m| m.mutated()).collect();
        assert_eq!(touched.len(), 1);
        assert_eq!(
            touched[0].calls(),
            vec!["drop_traffic dbserver".to_string(), "accept_traffic dbserver".to_string()]
        );
    }

    #[tokio::test]
    async fn test_restore_failure_does_not_fail_action() {
        let cluster = Arc::new(FakeCluster::new(&[("m1", true), ("m2", true)]));
        let monkey = monkey(&cluster, config());
        monkey.run_action("Reject Coordinator Traffic").await.unwrap();

        // Injection failing still restores traffic
        for machine in cluster.fakes() {
            machine.fail_actions(true);
        }
        let outcome = monkey.run_action("Reject Coordinator Traffic").await.unwrap();
        assert_eq!(outcome, ActionOutcome::Failed);
        let restores: usize = cluster
            .fakes()
            .iter()
            .map(|m| m.calls().iter().filter(|c| c.starts_with("accept_traffic")).count())
            .sum();
        assert_eq!(restores, 2);
    }

    #[tokio::test]
    async fn test_failed_injection_restores_without_hold() {
        let cluster = Arc::new(FakeCluster::new(&[("m1", true), ("m2", true), ("m3", true)]));
        for machine in cluster.fakes() {
            machine.fail_actions(true);
        }
        let config = config().hold_range(Duration::from_secs(60), Duration::from_secs(65));
        let monkey = monkey(&cluster, config);

        let outcome =
            tokio::time::timeout(Duration::from_secs(5), monkey.run_action("Drop Agent Traffic"))
                .await
                .expect("restore waited for the hold")
                .unwrap();
        assert_eq!(outcome, ActionOutcome::Failed);

        let touched: Vec<_> = cluster.fakes().into_iter().filter(|m| m.mutated()).collect();
        assert_eq!(touched.len(), 1);
        assert_eq!(
            touched[0].calls(),
            vec!["drop_traffic agent".to_string(), "accept_traffic agent".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stop_cancels_hold_promptly() {
        let cluster = Arc::new(FakeCluster::new(&[("m1", true), ("m2", true), ("m3", true)]));
        let config = config()
            .hold_range(Duration::from_secs(60), Duration::from_secs(65))
            .action_interval(Duration::from_secs(60));
        let monkey = monkey(&cluster, config);
        monkey.enable("Reject Agent Traffic").unwrap();

        monkey.start().unwrap();
        assert!(monkey.active());

        // Wait for the fault to be injected
        let deadline = Instant::now() + Duration::from_secs(5);
        while cluster.untouched() {
            assert!(Instant::now() < deadline, "fault was never injected");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let started = Instant::now();
        monkey.stop().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(monkey.state(), MonkeyState::Stopped);

        let restored = cluster
            .fakes()
            .iter()
            .any(|m| m.calls().contains(&"accept_traffic agent".to_string()));
        assert!(restored);
    }

    #[tokio::test]
    async fn test_start_twice_and_restart() {
        let cluster = Arc::new(FakeCluster::with_agents_and_extra(1));
        let monkey = monkey(&cluster, config());
        assert_eq!(monkey.state(), MonkeyState::Idle);

        monkey.start().unwrap();
        assert!(matches!(monkey.start(), Err(ChaosError::AlreadyActive)));
        monkey.stop().await;
        assert!(!monkey.active());

        monkey.start().unwrap();
        monkey.stop().await;
        assert_eq!(monkey.state(), MonkeyState::Stopped);
    }

    #[tokio::test]
    async fn test_level_zero_never_mutates() {
        let cluster = Arc::new(FakeCluster::with_agents_and_extra(1));
        let monkey = monkey(&cluster, config());

        monkey.start().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        monkey.stop().await;

        assert!(cluster.untouched());
        assert!(monkey.recent_events(10).is_empty());
    }

    #[tokio::test]
    async fn test_set_level() {
        let cluster = Arc::new(FakeCluster::with_agents_and_extra(1));
        let monkey = monkey(&cluster, config());

        monkey.set_level(3).unwrap();
        assert_eq!(monkey.level(), 3);
        assert_eq!(monkey.actions().iter().filter(|a| a.enabled).count(), 12);
        assert!(monkey.set_level(9).is_err());
        assert_eq!(monkey.level(), 3);
    }

    #[tokio::test]
    async fn test_add_and_remove_machine() {
        let cluster = Arc::new(FakeCluster::with_agents_and_extra(1));
        let monkey = monkey(&cluster, config());

        assert_eq!(monkey.run_action("Add Machine").await.unwrap(), ActionOutcome::Succeeded);
        assert_eq!(cluster.added(), 1);
        assert!(monkey.recent_events(1)[0].description.contains("added-1"));

        assert_eq!(monkey.run_action("Remove Machine").await.unwrap(), ActionOutcome::Succeeded);
        let destroyed: Vec<_> =
            cluster.fakes().into_iter().filter(|m| m.is_destroyed()).collect();
        assert_eq!(destroyed.len(), 1);
        assert!(!destroyed[0].has_agent());
    }

    #[tokio::test]
    async fn test_unavailable_cluster_skips() {
        let cluster = Arc::new(FakeCluster::with_agents_and_extra(1));
        cluster.set_unavailable(true);
        let monkey = monkey(&cluster, config());

        assert_eq!(monkey.run_action("Reboot Machine").await.unwrap(), ActionOutcome::Skipped);
        assert!(matches!(monkey.run_action("nope").await, Err(ChaosError::UnknownAction(_))));
    }
}
