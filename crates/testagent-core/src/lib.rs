// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Core types shared by the testagent resilience harness.
//!
//! This crate provides the building blocks used by both halves of the harness:
//! - Configuration for chaos injection, workloads and the cluster under test
//! - A bounded, most-recent-first [`EventLog`]
//! - Per-operation success/failure [`Counter`]s
//! - The [`TestListener`] channel through which failures become durable records

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod counter;
pub mod error;
pub mod event;
pub mod failure;

pub use config::{
    ChaosConfig, ClusterConfig, Config, LogFormat, LoggingConfig, MachineCommands, MachineConfig,
    MetricsConfig, WorkloadConfig,
};
pub use counter::{Counter, OperationCounters};
pub use error::{Error, Result};
pub use event::{Event, EventLog};
pub use failure::{Failure, FailureCollector, TestListener};
