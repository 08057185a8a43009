// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Bounded, most-recent-first event log.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// An immutable, timestamped record of something the harness did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
    /// Human-readable description.
    pub description: String,
}

impl Event {
    /// Creates an event stamped with the current time.
    pub fn now(description: impl Into<String>) -> Self {
        Self { timestamp: Utc::now(), description: description.into() }
    }
}

impl std::fmt::Display for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"), self.description)
    }
}

/// A bounded log of [`Event`]s.
///
/// The newest event is always at the front. Once `capacity` events are held,
/// every insert evicts the oldest one, so a long-running process never grows
/// the log without bound. Writers and readers may live on different tasks.
#[derive(Debug)]
pub struct EventLog {
    capacity: usize,
    events: Mutex<VecDeque<Event>>,
}

impl EventLog {
    /// Creates an empty log retaining at most `capacity` events.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self { capacity, events: Mutex::new(VecDeque::with_capacity(capacity)) }
    }

    /// Records a new event with the current timestamp and returns it.
    pub fn record(&self, description: impl Into<String>) -> Event {
        let event = Event::now(description);
        self.push(event.clone());
        event
    }

    /// Appends an existing event.
    pub fn push(&self, event: Event) {
        let mut events = self.events.lock();
        events.push_front(event);
        events.truncate(self.capacity);
    }

    /// Returns up to `max` events, most recent first.
    pub fn recent(&self, max: usize) -> Vec<Event> {
        self.events.lock().iter().take(max).cloned().collect()
    }

    /// Returns the number of retained events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Returns true if no event has been retained.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Returns the retention limit.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
