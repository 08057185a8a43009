// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

use serde_json::{json, Value};

use super::{db_path, ResourceMutation};
use crate::error::OperationError;
use crate::protocol::{Intent, ResilientProtocol};
use crate::transport::Request;

/// An edge collection and the vertex collections it connects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeDefinition {
    /// Edge collection.
    pub collection: String,
    /// Source vertex collections.
    pub from: Vec<String>,
    /// Target vertex collections.
    pub to: Vec<String>,
}

/// Named graph layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSpec {
    /// Graph name.
    pub name: String,
    /// Edge definitions.
    pub edge_definitions: Vec<EdgeDefinition>,
    /// Whether the graph is a smart (sharded-by-attribute) graph.
    pub is_smart: bool,
    /// Sharding attribute of a smart graph. Unset for enterprise graphs.
    pub smart_graph_attribute: Option<String>,
    /// Shards per collection.
    pub number_of_shards: u32,
    /// Copies of each shard.
    pub replication_factor: u32,
}

impl GraphSpec {
    fn body(&self) -> Value {
        let edge_definitions: Vec<Value> = self
            .edge_definitions
            .iter()
            .map(|d| json!({ "collection": d.collection, "from": d.from, "to": d.to }))
            .collect();
        let mut options = json!({
            "numberOfShards": self.number_of_shards,
            "replicationFactor": self.replication_factor,
        });
        if let Some(attribute) = &self.smart_graph_attribute {
            options["smartGraphAttribute"] = json!(attribute);
        }
        json!({
            "name": self.name,
            "edgeDefinitions": edge_definitions,
            "isSmart": self.is_smart,
            "options": options,
        })
    }
}

impl ResilientProtocol {
    /// Creates a named graph with its collections.
    pub async fn create_graph(&self, db: &str, spec: &GraphSpec) -> Result<(), OperationError> {
        let mut mutation = ResourceMutation {
            name: "createGraph",
            intent: Intent::Create,
            request: Request::post(format!("{}/_api/gharial", db_path(db)))
                .json(spec.body())
                .success(&[201, 202])
                .failure(&[409, 500, 503]),
            probe_path: format!("{}/_api/gharial/{}", db_path(db), spec.name),
        };
        self.execute(&mut mutation).await.map(|_| ())
    }

    /// Drops a named graph together with its collections.
    pub async fn drop_graph(&self, db: &str, name: &str) -> Result<(), OperationError> {
        let path = format!("{}/_api/gharial/{}", db_path(db), name);
        let mut mutation = ResourceMutation {
            name: "dropGraph",
            intent: Intent::Delete,
            request: Request::delete(path.clone())
                .query("dropCollections", "true")
                .success(&[200, 201, 202])
                .failure(&[404, 500, 503]),
            probe_path: path,
        };
        self.execute(&mut mutation).await.map(|_| ())
    }
}
