// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Workload plans.
//!
//! Plans are composed rather than layered: the one-shard plan is the
//! document plan run against a single-shard database, and the smart and
//! enterprise graph plans are the graph plan with a different flavor.

mod doc_col;
mod graph;

use testagent_core::WorkloadConfig;
use uuid::Uuid;

pub use doc_col::DocColPlan;
pub use graph::{GraphFlavor, GraphPlan};

use crate::error::WorkloadError;
use crate::runner::WorkloadPlan;

/// Names accepted by [`plan_by_name`].
pub const PLAN_NAMES: &[&str] =
    &["doc-col", "one-shard", "graph", "smart-graph", "enterprise-graph"];

/// Builds the plan called `name`.
///
/// # Errors
///
/// Returns [`WorkloadError::UnknownPlan`] for a name not in [`PLAN_NAMES`].
pub fn plan_by_name(
    name: &str,
    config: &WorkloadConfig,
) -> Result<Box<dyn WorkloadPlan>, WorkloadError> {
    Ok(match name {
        "doc-col" => Box::new(DocColPlan::new(config)),
        "one-shard" => Box::new(DocColPlan::one_shard(config)),
        "graph" => Box::new(GraphPlan::new(GraphFlavor::Community, config)),
        "smart-graph" => Box::new(GraphPlan::new(GraphFlavor::Smart, config)),
        "enterprise-graph" => Box::new(GraphPlan::new(GraphFlavor::Enterprise, config)),
        other => return Err(WorkloadError::UnknownPlan(other.to_string())),
    })
}

/// Returns a database name unique to this run.
pub(crate) fn unique_database(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_by_name() {
        let config = WorkloadConfig::default();
        for name in PLAN_NAMES {
            assert_eq!(plan_by_name(name, &config).unwrap().name(), *name);
        }
        assert!(matches!(
            plan_by_name("nope", &config),
            Err(WorkloadError::UnknownPlan(name)) if name == "nope"
        ));
    }

    #[test]
    fn test_unique_database() {
        let a = unique_database("doccol");
        assert!(a.starts_with("doccol_"));
        assert_ne!(a, unique_database("doccol"));
    }
}
