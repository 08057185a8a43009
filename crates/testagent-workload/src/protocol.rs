// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! The resilient operation protocol.
//!
//! Every mutating call runs through the same state machine:
//!
//! ```text
//! Attempt -> Classify -> Success
//!                     -> Fatal
//!                     -> Recheck -> Success | Fatal | Retry
//!                     -> Retry   -> Attempt (after backoff, within the deadline)
//! ```
//!
//! Classification decides whether a response is definite or ambiguous. An
//! ambiguous outcome is resolved by an independent read of the affected
//! resource, judged against the expectation the ambiguous status implies.
//! Ambiguity never leaves this module: callers only ever see success, a
//! fatal failure (already counted and reported) or a cooperative stop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::{counter, histogram};
use testagent_core::{Failure, OperationCounters, TestListener, WorkloadConfig};
use tracing::{debug, error};

use crate::error::{FailureKind, OperationError, TransportError};
use crate::gate::Gate;
use crate::transport::{Request, Response, Transport};

/// What a mutation is trying to do to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Intent {
    /// Bring a resource into existence.
    Create,
    /// Remove a resource.
    Delete,
    /// Change a resource's content.
    Update {
        /// Whether an explicit if-match revision was sent.
        precondition: bool,
    },
}

/// What a recheck is expected to observe about the mutation's effect.
///
/// "Exist" refers to the effect: the resource for a create, its absence for
/// a delete, the new content for an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// The effect may already have landed and must be visible.
    ShouldExist,
    /// The mutation cannot have completed; the effect must not be visible.
    ShouldNotExist,
    /// Either observation is acceptable.
    None,
}

/// What a recheck observed.
#[derive(Debug, Clone, PartialEq)]
pub enum Observation {
    /// The effect is visible. Carries the read's response.
    Applied(Response),
    /// The effect is not visible.
    NotApplied,
    /// The resource is in a state no attempt could have produced.
    Contradictory(String),
}

/// The classification of one attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    /// Definite success.
    Success,
    /// Definite failure.
    Fatal(FailureKind, String),
    /// Ambiguous; resolve with a recheck.
    Recheck(Expectation, String),
}

/// Classifies the outcome of attempt number `attempt` (starting at 1).
pub fn classify(
    intent: Intent,
    attempt: u32,
    request: &Request,
    outcome: &Result<Response, TransportError>,
) -> Verdict {
    let response = match outcome {
        Ok(response) => response,
        Err(TransportError::ConnectionRefused { .. }) => {
            return Verdict::Recheck(Expectation::ShouldNotExist, "connection refused".to_string())
        }
        Err(TransportError::Timeout { .. }) => {
            return Verdict::Recheck(Expectation::None, "timeout".to_string())
        }
        Err(e) => return Verdict::Fatal(FailureKind::Transport, e.to_string()),
    };

    let status = response.status;
    if request.is_success(status) {
        return Verdict::Success;
    }

    let first = attempt <= 1;
    match (intent, status) {
        // Timeouts and gateway errors: the request may or may not have been applied
        (_, 0) | (_, 408) | (_, 502) | (_, 504) => {
            Verdict::Recheck(Expectation::None, response.describe())
        }
        (_, 500) => Verdict::Recheck(Expectation::ShouldNotExist, response.describe()),
        (_, 503) => Verdict::Recheck(Expectation::ShouldExist, response.describe()),

        (Intent::Create, 409) if first => Verdict::Fatal(FailureKind::Rejected, response.describe()),
        (Intent::Create, 409) => Verdict::Recheck(Expectation::ShouldExist, response.describe()),

        (Intent::Delete, 404) if first => Verdict::Fatal(FailureKind::Rejected, response.describe()),
        (Intent::Delete, 404) => Verdict::Success,

        (Intent::Update { precondition: false }, 412) if first => {
            Verdict::Fatal(FailureKind::Rejected, response.describe())
        }
        (Intent::Update { .. }, 412) | (Intent::Update { .. }, 409) => {
            Verdict::Recheck(Expectation::None, response.describe())
        }
        (Intent::Update { .. }, 404) => Verdict::Fatal(FailureKind::Rejected, response.describe()),

        _ if request.is_declared(status) => {
            Verdict::Fatal(FailureKind::Rejected, response.describe())
        }
        _ => Verdict::Fatal(FailureKind::Protocol, response.describe()),
    }
}

/// Returns true for statuses after which a read can simply be repeated.
pub(crate) fn is_transient(status: u16) -> bool {
    matches!(status, 0 | 408 | 500 | 502 | 503 | 504)
}

/// Exponential backoff, doubling up to a cap.
#[derive(Debug, Clone)]
pub struct Backoff {
    current: Duration,
    max: Duration,
}

impl Backoff {
    /// Creates a backoff starting at `initial` and capped at `max`.
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { current: initial.min(max), max }
    }

    /// Returns the next delay and doubles the following one.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }
}

/// A mutating cluster call driven by [`ResilientProtocol::execute`].
#[async_trait]
pub trait Mutation: Send {
    /// Counter name, e.g. `createCollection`.
    fn name(&self) -> &'static str;

    /// What the mutation does to its resource.
    fn intent(&self) -> Intent;

    /// Builds the request for the next attempt.
    fn request(&self) -> Request;

    /// Reads the resource to find out whether the mutation took effect.
    ///
    /// May update the mutation for its next attempt, e.g. refresh a revision.
    async fn recheck(&mut self, protocol: &ResilientProtocol) -> Result<Observation, TransportError>;
}

/// Timing for the protocol.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Per-attempt timeout.
    pub attempt_timeout: Duration,
    /// Ceiling for one logical operation.
    pub deadline: Duration,
    /// First retry delay.
    pub initial_backoff: Duration,
    /// Retry delay cap.
    pub max_backoff: Duration,
    /// Low-level transport retries per attempt.
    pub transport_retries: u32,
}

impl From<&WorkloadConfig> for ProtocolConfig {
    fn from(config: &WorkloadConfig) -> Self {
        Self {
            attempt_timeout: config.operation_timeout_duration(),
            deadline: config.operation_deadline(),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
            transport_retries: config.transport_retries,
        }
    }
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self::from(&WorkloadConfig::default())
    }
}

/// Executes operations for one workload, resolving ambiguous outcomes.
///
/// Owns the workload's counters and reports each fatal outcome exactly once
/// through its [`TestListener`].
pub struct ResilientProtocol {
    transport: Arc<dyn Transport>,
    config: ProtocolConfig,
    counters: Arc<OperationCounters>,
    listener: Arc<dyn TestListener>,
    test: String,
    gate: Gate,
}

impl ResilientProtocol {
    /// Creates a protocol instance for the workload named `test`.
    pub fn new(
        test: impl Into<String>,
        transport: Arc<dyn Transport>,
        config: ProtocolConfig,
        listener: Arc<dyn TestListener>,
    ) -> Self {
        Self {
            transport,
            config,
            counters: Arc::new(OperationCounters::new()),
            listener,
            test: test.into(),
            gate: Gate::new(),
        }
    }

    /// Replaces the check-in gate.
    pub fn with_gate(mut self, gate: Gate) -> Self {
        self.gate = gate;
        self
    }

    /// Returns the per-operation counters.
    pub fn counters(&self) -> &Arc<OperationCounters> {
        &self.counters
    }

    /// Returns the check-in gate.
    pub fn gate(&self) -> &Gate {
        &self.gate
    }

    /// Returns the timing configuration.
    pub fn config(&self) -> &ProtocolConfig {
        &self.config
    }

    /// Applies the configured timeout and retry budget to `request`.
    pub fn prepare(&self, request: Request) -> Request {
        request.timeout(self.config.attempt_timeout).retries(self.config.transport_retries)
    }

    pub(crate) async fn send(&self, request: &Request) -> Result<Response, TransportError> {
        self.transport.execute(request).await
    }

    /// Sends a single read, used by rechecks. No retries beyond the transport's own.
    pub async fn fetch(&self, request: Request) -> Result<Response, TransportError> {
        counter!("testagent_operation_rechecks_total").increment(1);
        self.transport.execute(&self.prepare(request)).await
    }

    /// Runs `mutation` to a definite outcome.
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Fatal`] after counting and reporting it, or
    /// [`OperationError::Stopped`] if the gate stopped.
    pub async fn execute(&self, mutation: &mut dyn Mutation) -> Result<Response, OperationError> {
        let name = mutation.name();
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let mut maybe_landed = false;
        let mut attempt = 0u32;

        loop {
            self.gate.check_in().await?;
            attempt += 1;

            let request = self.prepare(mutation.request());
            let outcome = self.transport.execute(&request).await;
            counter!("testagent_operation_attempts_total", "operation" => name).increment(1);

            match classify(mutation.intent(), attempt, &request, &outcome) {
                Verdict::Success => {
                    let response = outcome.unwrap_or_else(|_| Response::new(0));
                    return Ok(self.succeed(name, started, response));
                }
                Verdict::Fatal(kind, detail) => {
                    let message = format!("{} attempt {}: {}", request, attempt, detail);
                    return Err(self.fail(name, kind, message));
                }
                Verdict::Recheck(expectation, reason) => {
                    // An earlier attempt may have landed after all
                    let expectation = match expectation {
                        Expectation::ShouldNotExist if maybe_landed => Expectation::None,
                        other => other,
                    };
                    maybe_landed |= !matches!(outcome, Err(TransportError::ConnectionRefused { .. }));
                    debug!(
                        operation = name,
                        attempt,
                        reason = %reason,
                        expectation = ?expectation,
                        "Ambiguous outcome, rechecking"
                    );

                    self.gate.check_in().await?;
                    match mutation.recheck(self).await {
                        Err(e) => {
                            let message = format!(
                                "{} attempt {}: recheck after {} failed: {}",
                                request, attempt, reason, e
                            );
                            return Err(self.fail(name, FailureKind::Transport, message));
                        }
                        Ok(Observation::Contradictory(detail)) => {
                            let message = format!(
                                "{} attempt {}: recheck after {} found {}",
                                request, attempt, reason, detail
                            );
                            return Err(self.fail(name, FailureKind::Contradiction, message));
                        }
                        Ok(Observation::Applied(_)) if expectation == Expectation::ShouldNotExist => {
                            let message = format!(
                                "{} attempt {}: effect visible after {} which implies it cannot have completed",
                                request, attempt, reason
                            );
                            return Err(self.fail(name, FailureKind::Contradiction, message));
                        }
                        Ok(Observation::NotApplied) if expectation == Expectation::ShouldExist => {
                            let message = format!(
                                "{} attempt {}: effect not visible after {} which implies it landed",
                                request, attempt, reason
                            );
                            return Err(self.fail(name, FailureKind::Contradiction, message));
                        }
                        Ok(Observation::Applied(response)) => {
                            return Ok(self.succeed(name, started, response));
                        }
                        Ok(Observation::NotApplied) => {
                            debug!(operation = name, attempt, "Not applied, retrying");
                        }
                    }
                }
            }

            let delay = backoff.next_delay();
            if Instant::now() + delay >= deadline {
                let message = format!(
                    "{} unresolved after {} attempts in {}ms",
                    request,
                    attempt,
                    started.elapsed().as_millis()
                );
                return Err(self.fail(name, FailureKind::Timeout, message));
            }
            self.gate.sleep(delay).await?;
        }
    }

    /// Runs a read, retrying ambiguous transport outcomes until the deadline.
    ///
    /// Any status in the request's success set is returned, which lets callers
    /// accept e.g. 404 as "absent".
    ///
    /// # Errors
    ///
    /// Returns [`OperationError::Fatal`] after counting and reporting it, or
    /// [`OperationError::Stopped`] if the gate stopped.
    pub async fn read(&self, name: &'static str, request: Request) -> Result<Response, OperationError> {
        let started = Instant::now();
        let deadline = started + self.config.deadline;
        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);
        let request = self.prepare(request);
        let mut attempt = 0u32;

        loop {
            self.gate.check_in().await?;
            attempt += 1;
            counter!("testagent_operation_attempts_total", "operation" => name).increment(1);

            let reason = match self.transport.execute(&request).await {
                Ok(response) if request.is_success(response.status) => {
                    return Ok(self.succeed(name, started, response));
                }
                Ok(response) if is_transient(response.status) => response.describe(),
                Ok(response) => {
                    let message = format!("{} attempt {}: {}", request, attempt, response.describe());
                    return Err(self.fail(name, FailureKind::Protocol, message));
                }
                Err(e @ TransportError::ConnectionRefused { .. })
                | Err(e @ TransportError::Timeout { .. }) => e.to_string(),
                Err(e) => {
                    let message = format!("{} attempt {}: {}", request, attempt, e);
                    return Err(self.fail(name, FailureKind::Transport, message));
                }
            };

            let delay = backoff.next_delay();
            if Instant::now() + delay >= deadline {
                let message = format!("{} unresolved after {} attempts: {}", request, attempt, reason);
                return Err(self.fail(name, FailureKind::Timeout, message));
            }
            debug!(operation = name, attempt, reason = %reason, "Read failed, retrying");
            self.gate.sleep(delay).await?;
        }
    }

    /// Counts and reports a failure detected outside a single call, such as a
    /// query returning the wrong number of documents.
    pub fn report(&self, name: &'static str, kind: FailureKind, message: String) -> OperationError {
        self.fail(name, kind, message)
    }

    /// Counts a success detected outside a single call.
    pub fn record_success(&self, name: &'static str) {
        self.counters.succeeded(name);
        counter!("testagent_operations_total", "operation" => name, "outcome" => "succeeded")
            .increment(1);
    }

    pub(crate) fn succeed(
        &self,
        name: &'static str,
        started: Instant,
        response: Response,
    ) -> Response {
        self.record_success(name);
        histogram!("testagent_operation_duration_seconds", "operation" => name)
            .record(started.elapsed().as_secs_f64());
        response
    }

    pub(crate) fn fail(
        &self,
        name: &'static str,
        kind: FailureKind,
        message: String,
    ) -> OperationError {
        self.counters.failed(name);
        counter!(
            "testagent_operations_total",
            "operation" => name,
            "outcome" => "failed",
            "kind" => kind.as_str()
        )
        .increment(1);
        error!(test = %self.test, operation = name, kind = %kind, message = %message, "Operation failed");
        self.listener.report_failure(Failure::now(
            self.test.clone(),
            format!("{} failed ({}): {}", name, kind, message),
        ));
        OperationError::Fatal { operation: name, kind, message }
    }
}

impl std::fmt::Debug for ResilientProtocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientProtocol")
            .field("test", &self.test)
            .field("config", &self.config)
            .field("state", &self.gate.state())
            .finish()
    }
}
