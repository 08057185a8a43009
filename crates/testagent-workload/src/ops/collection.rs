// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

use serde_json::json;

use super::{db_path, ResourceMutation};
use crate::error::OperationError;
use crate::protocol::{Intent, ResilientProtocol};
use crate::transport::Request;

/// Collection layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionSpec {
    /// Collection name.
    pub name: String,
    /// Number of shards.
    pub number_of_shards: u32,
    /// Copies of each shard.
    pub replication_factor: u32,
    /// Whether the collection holds edges.
    pub edge: bool,
}

impl CollectionSpec {
    /// A document collection.
    pub fn documents(name: impl Into<String>, number_of_shards: u32, replication_factor: u32) -> Self {
        Self { name: name.into(), number_of_shards, replication_factor, edge: false }
    }
}

impl ResilientProtocol {
    /// Creates a collection in `db`.
    pub async fn create_collection(
        &self,
        db: &str,
        spec: &CollectionSpec,
    ) -> Result<(), OperationError> {
        let body = json!({
            "name": spec.name,
            "numberOfShards": spec.number_of_shards,
            "replicationFactor": spec.replication_factor,
            "type": if spec.edge { 3 } else { 2 },
        });
        let mut mutation = ResourceMutation {
            name: "createCollection",
            intent: Intent::Create,
            request: Request::post(format!("{}/_api/collection", db_path(db)))
                .json(body)
                .success(&[200, 201])
                .failure(&[409, 500, 503]),
            probe_path: format!("{}/_api/collection/{}", db_path(db), spec.name),
        };
        self.execute(&mut mutation).await.map(|_| ())
    }

    /// Drops collection `name` from `db`.
    pub async fn drop_collection(&self, db: &str, name: &str) -> Result<(), OperationError> {
        let path = format!("{}/_api/collection/{}", db_path(db), name);
        let mut mutation = ResourceMutation {
            name: "dropCollection",
            intent: Intent::Delete,
            request: Request::delete(path.clone()).success(&[200]).failure(&[404, 500, 503]),
            probe_path: path,
        };
        self.execute(&mut mutation).await.map(|_| ())
    }
}
