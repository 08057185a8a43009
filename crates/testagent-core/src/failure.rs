// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Failure records and the listener that receives them.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// A durable record of a genuine failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    /// When the failure was classified.
    pub timestamp: DateTime<Utc>,
    /// Name of the workload that observed it.
    pub test: String,
    /// Full description including request/response context.
    pub message: String,
}

impl Failure {
    /// Creates a failure stamped with the current time.
    pub fn now(test: impl Into<String>, message: impl Into<String>) -> Self {
        Self { timestamp: Utc::now(), test: test.into(), message: message.into() }
    }
}

/// Receives failures from workload tasks.
///
/// This is the only path by which a fatal classification becomes externally
/// visible. Each logical operation reports at most once.
pub trait TestListener: Send + Sync {
    /// Records a failure.
    fn report_failure(&self, failure: Failure);
}

/// A listener that keeps every reported failure in memory.
#[derive(Debug, Default)]
pub struct FailureCollector {
    failures: Mutex<Vec<Failure>>,
}

impl FailureCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all failures in report order.
    pub fn failures(&self) -> Vec<Failure> {
        self.failures.lock().clone()
    }

    /// Returns the number of reported failures.
    pub fn len(&self) -> usize {
        self.failures.lock().len()
    }

    /// Returns true if nothing has been reported.
    pub fn is_empty(&self) -> bool {
        self.failures.lock().is_empty()
    }
}

impl TestListener for FailureCollector {
    fn report_failure(&self, failure: Failure) {
        self.failures.lock().push(failure);
    }
}
