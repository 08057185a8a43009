// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

use async_trait::async_trait;
use serde_json::{json, Value};
use testagent_core::WorkloadConfig;
use tracing::debug;

use super::unique_database;
use crate::document::{PlainDocument, TestDocument};
use crate::error::{FailureKind, OperationError};
use crate::ops::CollectionSpec;
use crate::protocol::ResilientProtocol;
use crate::runner::WorkloadPlan;

/// Document CRUD against sharded collections.
///
/// Every cycle creates a fresh collection, writes documents, reads them
/// back, updates the even ones with their revision, deletes the odd ones,
/// checks a full query against what should remain and drops the collection.
#[derive(Debug)]
pub struct DocColPlan {
    name: &'static str,
    database: String,
    one_shard: bool,
    number_of_shards: u32,
    replication_factor: u32,
    documents_per_cycle: usize,
    cycle: u64,
}

impl DocColPlan {
    /// Creates the plan for sharded collections in a regular database.
    pub fn new(config: &WorkloadConfig) -> Self {
        Self {
            name: "doc-col",
            database: unique_database("doccol"),
            one_shard: false,
            number_of_shards: config.number_of_shards,
            replication_factor: config.replication_factor,
            documents_per_cycle: config.documents_per_cycle,
            cycle: 0,
        }
    }

    /// Creates the plan for a one-shard database, where every collection
    /// has a single shard on the same dbserver.
    pub fn one_shard(config: &WorkloadConfig) -> Self {
        Self {
            name: "one-shard",
            database: unique_database("oneshard"),
            one_shard: true,
            number_of_shards: 1,
            ..Self::new(config)
        }
    }

    /// Returns the test database name.
    pub fn database(&self) -> &str {
        &self.database
    }

    async fn verify_reads(
        &self,
        protocol: &ResilientProtocol,
        collection: &str,
        documents: &mut [(PlainDocument, Option<String>)],
    ) -> Result<(), OperationError> {
        for (document, revision) in documents.iter_mut() {
            let stored = protocol
                .read_document::<PlainDocument>(&self.database, collection, document.key())
                .await?;
            match stored {
                Some((stored, stored_revision)) if stored.same_content(document) => {
                    *revision = stored_revision.or(revision.take());
                }
                Some((stored, _)) => {
                    let message = format!(
                        "{}/{} holds {:?}, expected {:?}",
                        collection, document.key, stored, document
                    );
                    return Err(protocol.report("verifyDocument", FailureKind::Contradiction, message));
                }
                None => {
                    let message = format!("{}/{} missing after insert", collection, document.key);
                    return Err(protocol.report("verifyDocument", FailureKind::Contradiction, message));
                }
            }
        }
        protocol.record_success("verifyDocument");
        Ok(())
    }

    async fn verify_query(
        &self,
        protocol: &ResilientProtocol,
        collection: &str,
        expected: &[PlainDocument],
    ) -> Result<(), OperationError> {
        let results = protocol
            .query_all(&self.database, "FOR d IN @@col RETURN d", json!({ "@col": collection }))
            .await?;

        let mut found: Vec<PlainDocument> = results
            .into_iter()
            .filter_map(|v: Value| serde_json::from_value(v).ok())
            .collect();
        found.sort_by(|a, b| a.key.cmp(&b.key));
        let mut expected = expected.to_vec();
        expected.sort_by(|a, b| a.key.cmp(&b.key));

        if found == expected {
            protocol.record_success("verifyQuery");
            return Ok(());
        }
        let keys = |docs: &[PlainDocument]| docs.iter().map(|d| d.key.clone()).collect::<Vec<_>>();
        let message = format!(
            "query over {} returned {} documents {:?}, expected {} {:?}",
            collection,
            found.len(),
            keys(&found),
            expected.len(),
            keys(&expected)
        );
        Err(protocol.report("verifyQuery", FailureKind::Contradiction, message))
    }
}

#[async_trait]
impl WorkloadPlan for DocColPlan {
    fn name(&self) -> &str {
        self.name
    }

    async fn prepare(&mut self, protocol: &ResilientProtocol) -> Result<(), OperationError> {
        protocol.create_database(&self.database, self.one_shard).await
    }

    async fn step(&mut self, protocol: &ResilientProtocol) -> Result<(), OperationError> {
        self.cycle += 1;
        let db = self.database.clone();
        let collection = format!("c{}", self.cycle);
        let spec =
            CollectionSpec::documents(&collection, self.number_of_shards, self.replication_factor);
        protocol.create_collection(&db, &spec).await?;

        let mut documents = Vec::with_capacity(self.documents_per_cycle);
        for seq in 0..self.documents_per_cycle as u64 {
            let document = PlainDocument::new(seq, (self.cycle * 1_000 + seq) as i64);
            let revision = protocol.insert_document(&db, &collection, &document).await?;
            documents.push((document, revision));
        }
        self.verify_reads(protocol, &collection, &mut documents).await?;

        let mut remaining = Vec::with_capacity(documents.len());
        for (seq, (document, revision)) in documents.into_iter().enumerate() {
            if seq % 2 == 0 {
                let updated = document.updated(document.value + 1);
                protocol
                    .update_document(&db, &collection, &document, &updated, revision.as_deref())
                    .await?;
                remaining.push(updated);
            } else {
                protocol.delete_document(&db, &collection, document.key()).await?;
            }
        }

        let verified = self.verify_query(protocol, &collection, &remaining).await;
        protocol.drop_collection(&db, &collection).await?;
        debug!(test = self.name, cycle = self.cycle, documents = remaining.len(), "Cycle verified");
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
        WorkloadConfig { documents_per_cycle: 2, ..WorkloadConfig::default() }
    }

    fn stored(document: &PlainDocument, revision: &str) -> Value {
        let mut body = document.to_body();
        body["_rev"] = json!(revision);
        body
    }

    fn script(db: &str, query_result: Vec<Value>) -> ScriptedTransport {
        let col = format!("/_db/{}/_api/collection", db);
        let doc = format!("/_db/{}/_api/document/c1", db);
        let doc0 = PlainDocument::new(0, 1_000);
        let doc1 = PlainDocument::new(1, 1_001);

        ScriptedTransport::new()
            .respond(Method::Post, "/_api/database", 201)
            .respond(Method::Post, &col, 200)
            .respond_json(Method::Post, &doc, 201, json!({"_key": "doc0", "_rev": "_a"}))
            .respond_json(Method::Post, &doc, 201, json!({"_key": "doc1", "_rev": "_b"}))
            .respond_json(Method::Get, &format!("{}/doc0", doc), 200, stored(&doc0, "_a"))
            .respond_json(Method::Get, &format!("{}/doc1", doc), 200, stored(&doc1, "_b"))
            .respond_json(Method::Put, &format!("{}/doc0", doc), 201, json!({"_rev": "_c"}))
            .respond(Method::Delete, &format!("{}/doc1", doc), 200)
            .respond_json(
                Method::Post,
                &format!("/_db/{}/_api/cursor", db),
                201,
                json!({"result": query_result, "hasMore": false}),
            )
            .respond(Method::Delete, &format!("{}/c1", col), 200)
    }

    fn protocol(
        transport: Arc<ScriptedTransport>,
    ) -> (ResilientProtocol, Arc<FailureCollector>) {
        let listener = Arc::new(FailureCollector::new());
        let config = ProtocolConfig {
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            ..ProtocolConfig::default()
        };
        (ResilientProtocol::new("doc-col", transport, config, listener.clone()), listener)
    }

    #[tokio::test]
    async fn test_cycle() {
        let mut plan = DocColPlan::new(&config());
        let updated = PlainDocument::new(0, 1_000).updated(1_001);
        let transport = Arc::new(script(plan.database(), vec![stored(&updated, "_c")]));
        let (protocol, listener) = protocol(transport.clone());

        plan.prepare(&protocol).await.unwrap();
        plan.step(&protocol).await.unwrap();

        assert_eq!(transport.remaining(), 0);
        assert!(listener.is_empty());
        let counters = protocol.counters();
        assert_eq!(counters.get("insertDocument").unwrap().succeeded, 2);
        assert_eq!(counters.get("updateDocument").unwrap().succeeded, 1);
        assert_eq!(counters.get("deleteDocument").unwrap().succeeded, 1);
        assert_eq!(counters.get("verifyQuery").unwrap().succeeded, 1);
        assert_eq!(counters.total_failed(), 0);

        // The update carried the revision read back
        let put = transport.requests().into_iter().find(|r| r.method == Method::Put).unwrap();
        assert!(put.headers.contains(&("If-Match".to_string(), "_a".to_string())));
    }

    #[tokio::test]
    async fn test_query_mismatch_is_reported_and_collection_dropped() {
        let mut plan = DocColPlan::new(&config());
        let transport = Arc::new(script(plan.database(), vec![]));
        let (protocol, listener) = protocol(transport.clone());

        plan.prepare(&protocol).await.unwrap();
        let err = plan.step(&protocol).await.unwrap_err();

        assert_eq!(err.kind(), Some(FailureKind::Contradiction));
        assert_eq!(listener.len(), 1);
        assert_eq!(transport.remaining(), 0);
        assert_eq!(protocol.counters().get("verifyQuery").unwrap().failed, 1);
    }

    #[test]
    fn test_one_shard_layout() {
        let plan = DocColPlan::one_shard(&WorkloadConfig::default());
        assert_eq!(plan.name(), "one-shard");
        assert!(plan.one_shard);
        assert_eq!(plan.number_of_shards, 1);
        assert!(plan.database().starts_with("oneshard_"));
    }
}
