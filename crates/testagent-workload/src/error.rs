// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Workload error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from a single transport call.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Nothing was sent: the endpoint refused the connection.
    #[error("connection to {endpoint} refused: {message}")]
    ConnectionRefused {
        /// Endpoint that refused.
        endpoint: String,
        /// Client error detail.
        message: String,
    },

    /// The request was sent but no response arrived in time.
    #[error("request to {endpoint} timed out after {timeout_ms}ms")]
    Timeout {
        /// Endpoint that timed out.
        endpoint: String,
        /// Per-attempt timeout in milliseconds.
        timeout_ms: u64,
    },

    /// The request could not be carried out.
    #[error("request failed: {0}")]
    Request(String),

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),

    /// A read answered with a status it does not accept.
    #[error("unexpected status {status} for {path}")]
    UnexpectedStatus {
        /// HTTP status.
        status: u16,
        /// Request path.
        path: String,
    },
}

/// Classification of a fatal operation outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// A recheck observed a state that contradicts the expectation.
    Contradiction,
    /// The operation deadline elapsed without resolution.
    Timeout,
    /// A connection, decode or recheck error.
    Transport,
    /// A status outside every declared set.
    Protocol,
    /// A definite first-attempt failure the server reported.
    Rejected,
}

impl FailureKind {
    /// Returns the lowercase kind name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contradiction => "contradiction",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
            Self::Protocol => "protocol",
            Self::Rejected => "rejected",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The terminal outcome of a failed operation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OperationError {
    /// A genuine failure. Already counted and reported when returned.
    #[error("{operation} failed ({kind}): {message}")]
    Fatal {
        /// Operation name, e.g. `createCollection`.
        operation: &'static str,
        /// Failure classification.
        kind: FailureKind,
        /// Full context.
        message: String,
    },

    /// The workload was stopped while the operation was pending.
    #[error("operation stopped")]
    Stopped,
}

impl OperationError {
    /// Returns the failure kind of a fatal outcome.
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Self::Fatal { kind, .. } => Some(*kind),
            Self::Stopped => None,
        }
    }

    /// Returns true for the cooperative stop outcome.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped)
    }
}

/// Errors setting up a workload.
#[derive(Debug, Error)]
pub enum WorkloadError {
    /// No plan has this name.
    #[error("unknown workload plan: {0}")]
    UnknownPlan(String),

    /// No coordinator endpoint is configured.
    #[error("no coordinator endpoints configured")]
    NoEndpoints,

    /// The HTTP client could not be built.
    #[error("http client: {0}")]
    Client(String),
}
