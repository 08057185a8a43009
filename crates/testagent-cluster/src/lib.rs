// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Cluster capabilities consumed by the testagent harness.
//!
//! This crate provides:
//! - The [`Machine`] capability trait: role membership, health probes and
//!   the mutating actions the chaos injector uses (kill, restart, traffic
//!   partitions, reboot, destroy)
//! - The [`ClusterView`] trait through which the harness discovers machines
//! - [`MachineSet`] with pure, identity-deduplicating set algebra
//! - The [`ReadinessOracle`] which fans out concurrent health probes
//!
//! The harness never constructs machines itself. Implementations live with
//! whatever provisions the cluster (containers, VMs, a static config).
//!
//! # Example
//!
//! ```ignore
//! use testagent_cluster::{ReadinessOracle, Role};
//!
//! let machines = cluster.machines().await?;
//! let oracle = ReadinessOracle::new(Duration::from_secs(5));
//! let report = oracle.probe(&machines, Role::Coordinator).await?;
//! println!("{} of {} coordinators ready", report.ready_count(), report.probed.len());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod machine;
pub mod machine_set;
pub mod readiness;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod view;

pub use machine::{Machine, MachineError, Role};
pub use machine_set::MachineSet;
pub use readiness::{ReadinessError, ReadinessOracle, ReadinessReport, Topology};
pub use view::{ClusterError, ClusterView};
