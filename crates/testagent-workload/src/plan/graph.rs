// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

use async_trait::async_trait;
use serde_json::json;
use testagent_core::WorkloadConfig;
use tracing::debug;

use super::unique_database;
use crate::document::{EdgeDocument, VertexDocument};
use crate::error::{FailureKind, OperationError};
use crate::ops::{EdgeDefinition, GraphSpec};
use crate::protocol::ResilientProtocol;
use crate::runner::WorkloadPlan;

const REGIONS: &[&str] = &["eu", "us", "ap"];
const SMART_ATTRIBUTE: &str = "region";

/// Graph sharding flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphFlavor {
    /// Collections sharded by key.
    Community,
    /// Vertices sharded by the `region` attribute, edges next to their source.
    Smart,
    /// Smart sharding without a user-defined attribute.
    Enterprise,
}

impl GraphFlavor {
    /// Returns the plan name for this flavor.
    pub fn plan_name(&self) -> &'static str {
        match self {
            Self::Community => "graph",
            Self::Smart => "smart-graph",
            Self::Enterprise => "enterprise-graph",
        }
    }
}

/// Graph creation, vertex and edge writes and a traversal per cycle.
///
/// Every cycle builds a fresh graph whose vertices form a chain, checks
/// that a traversal from the head reaches every vertex and drops the graph
/// with its collections.
#[derive(Debug)]
pub struct GraphPlan {
    flavor: GraphFlavor,
    database: String,
    number_of_shards: u32,
    replication_factor: u32,
    vertices_per_cycle: usize,
    cycle: u64,
}

impl GraphPlan {
    /// Creates a graph plan of the given flavor.
    pub fn new(flavor: GraphFlavor, config: &WorkloadConfig) -> Self {
        Self {
            flavor,
            database: unique_database(&flavor.plan_name().replace('-', "")),
            number_of_shards: config.number_of_shards,
            replication_factor: config.replication_factor,
            vertices_per_cycle: config.documents_per_cycle.max(2),
            cycle: 0,
        }
    }

    /// Returns the test database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    fn spec(&self, name: &str, vertices: &str, edges: &str) -> GraphSpec {
        GraphSpec {
            name: name.to_string(),
            edge_definitions: vec![EdgeDefinition {
                collection: edges.to_string(),
                from: vec![vertices.to_string()],
                to: vec![vertices.to_string()],
            }],
            is_smart: self.flavor != GraphFlavor::Community,
            smart_graph_attribute: match self.flavor {
                GraphFlavor::Smart => Some(SMART_ATTRIBUTE.to_string()),
                _ => None,
            },
            number_of_shards: self.number_of_shards,
            replication_factor: self.replication_factor,
        }
    }

    fn vertex(&self, seq: usize) -> VertexDocument {
        let region = REGIONS[seq % REGIONS.len()];
        let key = match self.flavor {
            // Smart keys carry the sharding value as prefix
            GraphFlavor::Smart => format!("{}:v{}", region, seq),
            _ => format!("v{}", seq),
        };
        VertexDocument { key, region: region.to_string(), value: seq as i64 }
    }

    fn edge(
        &self,
        vertices: &str,
        from: &VertexDocument,
        to: &VertexDocument,
        seq: usize,
    ) -> EdgeDocument {
        let key = match self.flavor {
            GraphFlavor::Smart => format!("{}:e{}:{}", from.region, seq, to.region),
            _ => format!("e{}", seq),
        };
        EdgeDocument {
            key,
            from: format!("{}/{}", vertices, from.key),
            to: format!("{}/{}", vertices, to.key),
            weight: seq as i64,
        }
    }
}

#[async_trait]
impl WorkloadPlan for GraphPlan {
    fn name(&self) -> &str {
        self.flavor.plan_name()
    }

    async fn prepare(&mut self, protocol: &ResilientProtocol) -> Result<(), OperationError> {
        protocol.create_database(&self.database, false).await
    }

    async fn step(&mut self, protocol: &ResilientProtocol) -> Result<(), OperationError> {
        self.cycle += 1;
        let db = self.database.clone();
        let graph = format!("g{}", self.cycle);
        let vertices = format!("v{}", self.cycle);
        let edges = format!("e{}", self.cycle);
        protocol.create_graph(&db, &self.spec(&graph, &vertices, &edges)).await?;

        let chain: Vec<VertexDocument> =
            (0..self.vertices_per_cycle).map(|seq| self.vertex(seq)).collect();
        for vertex in &chain {
            protocol.insert_vertex(&db, &graph, &vertices, vertex).await?;
        }
        for (seq, pair) in chain.windows(2).enumerate() {
            let edge = self.edge(&vertices, &pair[0], &pair[1], seq);
            protocol.create_edge(&db, &graph, &edges, &edge).await?;
        }

        let start = format!("{}/{}", vertices, chain[0].key);
        let reached = protocol
            .query_all(
                &db,
                "FOR v IN 0..@depth OUTBOUND @start GRAPH @graph RETURN v._key",
                json!({ "depth": chain.len(), "start": start, "graph": graph }),
            )
            .await?;
        let verified = if reached.len() == chain.len() {
            protocol.record_success("verifyTraversal");
            Ok(())
        } else {
            let message = format!(
                "traversal over {} from {} reached {} of {} vertices",
                graph,
                start,
                reached.len(),
                chain.len()
            );
            Err(protocol.report("verifyTraversal", FailureKind::Contradiction, message))
        };

        protocol.drop_graph(&db, &graph).await?;
        debug!(test = self.name(), cycle = self.cycle, vertices = chain.len(), "Cycle verified");
        verified
    }

    async fn teardown(&mut self, protocol: &ResilientProtocol) -> Result<(), OperationError> {
        protocol.drop_database(&self.database).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use testagent_core::FailureCollector;

    use super::*;
    use crate::protocol::ProtocolConfig;
    use crate::testing::ScriptedTransport;
    use crate::transport::Method;

    fn config() -> WorkloadConfig {
        WorkloadConfig { documents_per_cycle: 3, ..WorkloadConfig::default() }
    }

    #[test]
    fn test_smart_keys_carry_region() {
        let plan = GraphPlan::new(GraphFlavor::Smart, &config());
        let a = plan.vertex(0);
        let b = plan.vertex(1);
        assert_eq!(a.key, "eu:v0");
        assert_eq!(b.key, "us:v1");

        let edge = plan.edge("v1", &a, &b, 0);
        assert_eq!(edge.key, "eu:e0:us");
        assert_eq!(edge.from, "v1/eu:v0");

        let spec = plan.spec("g1", "v1", "e1");
        assert!(spec.is_smart);
        assert_eq!(spec.smart_graph_attribute.as_deref(), Some("region"));
    }

    #[test]
    fn test_flavor_layouts() {
        let community = GraphPlan::new(GraphFlavor::Community, &config());
        assert_eq!(community.vertex(4).key, "v4");
        assert!(!community.spec("g", "v", "e").is_smart);

        let enterprise = GraphPlan::new(GraphFlavor::Enterprise, &config());
        let spec = enterprise.spec("g", "v", "e");
        assert!(spec.is_smart);
        assert!(spec.smart_graph_attribute.is_none());
        assert_eq!(enterprise.name(), "enterprise-graph");
        assert!(enterprise.database().starts_with("enterprisegraph_"));
    }

    #[tokio::test]
    async fn test_short_traversal_is_contradiction() {
        let mut plan = GraphPlan::new(GraphFlavor::Community, &config());
        let db = format!("/_db/{}", plan.database());
        let vertex = format!("{}/_api/gharial/g1/vertex/v1", db);
        let edge = format!("{}/_api/gharial/g1/edge/e1", db);
        let script = ScriptedTransport::new()
            .respond(Method::Post, "/_api/database", 201)
            .respond(Method::Post, &format!("{}/_api/gharial", db), 202)
            .respond(Method::Post, &vertex, 202)
            .respond(Method::Post, &vertex, 202)
            .respond(Method::Post, &vertex, 202)
            .respond(Method::Post, &edge, 202)
            .respond(Method::Post, &edge, 202)
            .respond_json(
                Method::Post,
                &format!("{}/_api/cursor", db),
                201,
                json!({"result": ["v0", "v1"], "hasMore": false}),
            )
            .respond(Method::Delete, &format!("{}/_api/gharial/g1", db), 202);
        let transport = Arc::new(script);
        let listener = Arc::new(FailureCollector::new());
        let config = ProtocolConfig { initial_backoff: Duration::from_millis(1), ..ProtocolConfig::default() };
        let protocol = ResilientProtocol::new("graph", transport.clone(), config, listener.clone());

        plan.prepare(&protocol).await.unwrap();
        let err = plan.step(&protocol).await.unwrap_err();
        assert_eq!(err.kind(), Some(FailureKind::Contradiction));
        assert_eq!(listener.len(), 1);
        assert_eq!(transport.remaining(), 0);
        assert_eq!(protocol.counters().get("createEdge").unwrap().succeeded, 2);
        assert_eq!(protocol.counters().get("dropGraph").unwrap().succeeded, 1);
    }
}
