// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Workload tasks.
//!
//! A [`WorkloadRunner`] drives one [`WorkloadPlan`] on its own task: setup
//! once, then plan cycles separated by the step interval until stopped.
//! Pause and stop are cooperative and observed before every network call
//! through the shared [`Gate`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use testagent_core::{
    Counter, Event, EventLog, Failure, OperationCounters, TestListener, WorkloadConfig,
};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::OperationError;
use crate::gate::{Gate, RunState};
use crate::protocol::{ProtocolConfig, ResilientProtocol};
use crate::transport::Transport;

/// A workload script.
///
/// Operations go through the given protocol, which counts and reports every
/// fatal outcome. A plan only decides what to do next.
#[async_trait]
pub trait WorkloadPlan: Send {
    /// Workload name used for counters, failures and logs.
    fn name(&self) -> &str;

    /// One-time setup, e.g. creating the test database. A failure aborts the workload.
    async fn prepare(&mut self, protocol: &ResilientProtocol) -> Result<(), OperationError>;

    /// Runs one plan cycle.
    async fn step(&mut self, protocol: &ResilientProtocol) -> Result<(), OperationError>;

    /// Best-effort cleanup after the last cycle.
    async fn teardown(&mut self, protocol: &ResilientProtocol) -> Result<(), OperationError>;
}

/// Point-in-time status of one workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestStatus {
    /// Workload name.
    pub name: String,
    /// Current run state.
    pub state: RunState,
    /// Failures reported so far.
    pub failures: u64,
    /// Recent messages, most recent first.
    pub messages: Vec<Event>,
    /// Per-operation outcome counters.
    pub counters: Vec<Counter>,
}

/// Forwards failures while keeping a tally and the recent messages.
struct StatusListener {
    inner: Arc<dyn TestListener>,
    failures: AtomicU64,
    messages: EventLog,
}

impl TestListener for StatusListener {
    fn report_failure(&self, failure: Failure) {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.messages.record(failure.message.clone());
        self.inner.report_failure(failure);
    }
}

/// A running workload.
pub struct WorkloadRunner {
    name: String,
    gate: Gate,
    status: Arc<StatusListener>,
    counters: Arc<OperationCounters>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl WorkloadRunner {
    /// Spawns `plan` on a new task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        plan: Box<dyn WorkloadPlan>,
        transport: Arc<dyn Transport>,
        config: &WorkloadConfig,
        listener: Arc<dyn TestListener>,
    ) -> Self {
        let name = plan.name().to_string();
        let status = Arc::new(StatusListener {
            inner: listener,
            failures: AtomicU64::new(0),
            messages: EventLog::new(config.message_capacity),
        });
        let gate = Gate::new();
        let protocol = ResilientProtocol::new(
            name.clone(),
            transport,
            ProtocolConfig::from(config),
            status.clone(),
        )
        .with_gate(gate.clone());
        let counters = protocol.counters().clone();

        let step_interval = config.step_interval_duration();
        let handle = tokio::spawn(run(plan, protocol, status.clone(), step_interval));

        Self { name, gate, status, counters, handle: Mutex::new(Some(handle)) }
    }

    /// Returns the workload name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the current run state.
    pub fn state(&self) -> RunState {
        self.gate.state()
    }

    /// Holds the workload at its next check-in point.
    pub fn pause(&self) {
        info!(test = %self.name, "Pausing workload");
        self.gate.pause();
    }

    /// Resumes a paused workload.
    pub fn resume(&self) {
        info!(test = %self.name, "Resuming workload");
        self.gate.resume();
    }

    /// Stops the workload and waits for its task to exit.
    ///
    /// Calling stop again returns immediately.
    pub async fn stop(&self) {
        self.gate.stop();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(test = %self.name, error = %e, "Workload task panicked");
            }
            info!(test = %self.name, "Workload stopped");
        }
    }

    /// Returns a status snapshot.
    pub fn status(&self) -> TestStatus {
        TestStatus {
            name: self.name.clone(),
            state: self.gate.state(),
            failures: self.status.failures.load(Ordering::Relaxed),
            messages: self.status.messages.recent(usize::MAX),
            counters: self.counters.snapshot(),
        }
    }
}

impl std::fmt::Debug for WorkloadRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkloadRunner")
            .field("name", &self.name)
            .field("state", &self.gate.state())
            .finish()
    }
}

async fn run(
    mut plan: Box<dyn WorkloadPlan>,
    protocol: ResilientProtocol,
    status: Arc<StatusListener>,
    step_interval: Duration,
) {
    let name = plan.name().to_string();
    info!(test = %name, "Workload starting");

    match plan.prepare(&protocol).await {
        Ok(()) => {
            status.messages.record("Setup complete");
        }
        Err(OperationError::Stopped) => return,
        Err(e) => {
            error!(test = %name, error = %e, "Workload setup failed, aborting");
            status.messages.record(format!("Setup failed, workload aborted: {}", e));
            protocol.gate().stop();
            return;
        }
    }

    let mut cycle = 0u64;
    loop {
        cycle += 1;
        match plan.step(&protocol).await {
            Ok(()) => debug!(test = %name, cycle, "Cycle complete"),
            Err(OperationError::Stopped) => break,
            Err(e) => {
                // Already counted and reported by the protocol
                warn!(test = %name, cycle, error = %e, "Cycle failed");
            }
        }
        if protocol.gate().sleep(step_interval).await.is_err() {
            break;
        }
    }

    // The stopped gate fails every check-in, so cleanup gets its own, bounded by one attempt
    let attempt_timeout = protocol.config().attempt_timeout;
    let cleanup = protocol.with_gate(Gate::new());
    match tokio::time::timeout(attempt_timeout, plan.teardown(&cleanup)).await {
        Ok(Ok(())) => debug!(test = %name, cycles = cycle, "Teardown complete"),
        Ok(Err(e)) => warn!(test = %name, error = %e, "Teardown failed"),
        Err(_) => warn!(test = %name, "Teardown timed out"),
    }
}
