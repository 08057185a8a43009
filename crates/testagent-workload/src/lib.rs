// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Workloads that keep the cluster busy while chaos is injected.
//!
//! This crate provides:
//! - The [`Transport`] abstraction and its coordinator-rotating [`HttpTransport`]
//! - The [`ResilientProtocol`], which resolves ambiguous write outcomes with
//!   an independent recheck before anything is counted as a failure
//! - Typed cluster operations (databases, collections, graphs, documents,
//!   cursor queries) built on the protocol
//! - [`WorkloadRunner`], driving a [`WorkloadPlan`] on its own task with
//!   cooperative pause and stop
//!
//! # Example
//!
//! ```ignore
//! use testagent_workload::{plan_by_name, HttpTransport, WorkloadRunner};
//!
//! let transport = Arc::new(HttpTransport::new(endpoints, "root", "")?);
//! let plan = plan_by_name("doc-col", &config.workload)?;
//! let runner = WorkloadRunner::spawn(plan, transport, &config.workload, listener);
//! // ...
//! runner.stop().await;
//! println!("{:?}", runner.status());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod document;
pub mod error;
pub mod gate;
pub mod http;
pub mod ops;
pub mod plan;
pub mod protocol;
pub mod runner;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transport;

pub use document::{DocumentKind, EdgeDocument, PlainDocument, TestDocument, VertexDocument};
pub use error::{FailureKind, OperationError, TransportError, WorkloadError};
pub use gate::{Gate, RunState};
pub use http::HttpTransport;
pub use ops::{CollectionSpec, EdgeDefinition, GraphSpec};
pub use plan::{plan_by_name, DocColPlan, GraphFlavor, GraphPlan, PLAN_NAMES};
pub use protocol::{
    classify, Backoff, Expectation, Intent, Mutation, Observation, ProtocolConfig,
    ResilientProtocol, Verdict,
};
pub use runner::{TestStatus, WorkloadPlan, WorkloadRunner};
pub use transport::{Method, Request, Response, ServerError, Transport};
