// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Chaos injector errors.

use testagent_cluster::ClusterError;
use thiserror::Error;

/// Errors returned by the chaos injector.
#[derive(Debug, Error)]
pub enum ChaosError {
    /// No action matches the given id or name.
    #[error("unknown chaos action: {0}")]
    UnknownAction(String),

    /// The requested chaos level is out of range.
    #[error("chaos level {level} exceeds maximum {max}")]
    InvalidLevel {
        /// Requested level.
        level: u8,
        /// Highest supported level.
        max: u8,
    },

    /// `start` was called while the injector was running.
    #[error("chaos injector is already active")]
    AlreadyActive,

    /// Cluster access failed.
    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

/// Result type for chaos operations.
pub type Result<T> = std::result::Result<T, ChaosError>;
