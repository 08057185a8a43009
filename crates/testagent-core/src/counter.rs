// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Success/failure counters per named operation.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome tally for one kind of operation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counter {
    /// Operation name, e.g. `createCollection`.
    pub name: String,
    /// Operations that ended in success.
    pub succeeded: u64,
    /// Operations that ended in a fatal failure.
    pub failed: u64,
}

/// The set of [`Counter`]s owned by one workload.
///
/// Counters keep the order in which their names were first seen so status
/// reports list operations in plan order.
#[derive(Debug, Default)]
pub struct OperationCounters {
    counters: Mutex<Vec<Counter>>,
}

impl OperationCounters {
    /// Creates an empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a successful operation.
    pub fn succeeded(&self, name: &str) {
        self.update(name, |c| c.succeeded += 1);
    }

    /// Records a failed operation.
    pub fn failed(&self, name: &str) {
        self.update(name, |c| c.failed += 1);
    }

    /// Returns the counter for `name`, if any operation of that kind ran.
    pub fn get(&self, name: &str) -> Option<Counter> {
        self.counters.lock().iter().find(|c| c.name == name).cloned()
    }

    /// Returns a copy of all counters.
    pub fn snapshot(&self) -> Vec<Counter> {
        self.counters.lock().clone()
    }

    /// Returns the total number of failed operations.
    pub fn total_failed(&self) -> u64 {
        self.counters.lock().iter().map(|c| c.failed).sum()
    }

    fn update(&self, name: &str, f: impl FnOnce(&mut Counter)) {
        let mut counters = self.counters.lock();
        match counters.iter_mut().find(|c| c.name == name) {
            Some(counter) => f(counter),
            None => {
                let mut counter = Counter { name: name.to_string(), ..Default::default() };
                f(&mut counter);
                counters.push(counter);
            }
        }
    }
}
