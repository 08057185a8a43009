// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Cluster discovery.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::machine::{Machine, MachineError};
use crate::machine_set::MachineSet;

/// Errors returned by a [`ClusterView`].
#[derive(Debug, Error)]
pub enum ClusterError {
    /// The cluster's machine inventory could not be read.
    #[error("cluster unavailable: {0}")]
    Unavailable(String),

    /// The operation is not supported by this cluster.
    #[error("unsupported cluster operation: {0}")]
    Unsupported(String),

    /// A machine-level failure.
    #[error(transparent)]
    Machine(#[from] MachineError),
}

/// The harness's view of the cluster under test.
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// Returns every machine currently part of the cluster.
    async fn machines(&self) -> Result<MachineSet, ClusterError>;

    /// Provisions a new machine hosting a dbserver and a coordinator.
    async fn add_machine(&self) -> Result<Arc<dyn Machine>, ClusterError>;
}
