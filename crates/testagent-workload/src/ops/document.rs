// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

use async_trait::async_trait;

use super::{db_path, lookup, ResourceMutation};
use crate::document::{EdgeDocument, TestDocument, VertexDocument};
use crate::error::{FailureKind, OperationError, TransportError};
use crate::protocol::{Intent, Mutation, Observation, ResilientProtocol};
use crate::transport::Request;

fn document_path(db: &str, collection: &str, key: &str) -> String {
    format!("{}/_api/document/{}/{}", db_path(db), collection, key)
}

/// Inserts a document; rechecks compare the stored content.
struct InsertDocument<D> {
    name: &'static str,
    path: String,
    probe_path: String,
    document: D,
}

#[async_trait]
impl<D: TestDocument> Mutation for InsertDocument<D> {
    fn name(&self) -> &'static str {
        self.name
    }

    fn intent(&self) -> Intent {
        Intent::Create
    }

    fn request(&self) -> Request {
        Request::post(self.path.clone())
            .json(self.document.to_body())
            .success(&[201, 202])
            .failure(&[409, 500, 503])
    }

    async fn recheck(&mut self, protocol: &ResilientProtocol) -> Result<Observation, TransportError> {
        Ok(match lookup(protocol, &self.probe_path).await? {
            None => Observation::NotApplied,
            Some(response) if self.document.matches(&response.body) => {
                Observation::Applied(response)
            }
            Some(response) => Observation::Contradictory(format!(
                "document {} stored with different content: {}",
                self.document.key(),
                response.body
            )),
        })
    }
}

/// Replaces a document; rechecks tell the old content from the new.
struct ReplaceDocument<D> {
    path: String,
    old: D,
    new: D,
    revision: Option<String>,
}

#[async_trait]
impl<D: TestDocument> Mutation for ReplaceDocument<D> {
    fn name(&self) -> &'static str {
        "updateDocument"
    }

    fn intent(&self) -> Intent {
        Intent::Update { precondition: self.revision.is_some() }
    }

    fn request(&self) -> Request {
        let request = Request::put(self.path.clone())
            .json(self.new.to_body())
            .success(&[200, 201, 202])
            .failure(&[404, 409, 412, 500, 503]);
        match &self.revision {
            Some(revision) => request.header("If-Match", revision.clone()),
            None => request,
        }
    }

    async fn recheck(&mut self, protocol: &ResilientProtocol) -> Result<Observation, TransportError> {
        Ok(match lookup(protocol, &self.path).await? {
            None => Observation::Contradictory(format!("document {} vanished", self.new.key())),
            Some(response) if self.new.matches(&response.body) => Observation::Applied(response),
            Some(response) if self.old.matches(&response.body) => {
                // Retry against the revision actually stored
                if self.revision.is_some() {
                    self.revision = response.revision.clone();
                }
                Observation::NotApplied
            }
            Some(response) => Observation::Contradictory(format!(
                "document {} holds neither the old nor the new content: {}",
                self.new.key(),
                response.body
            )),
        })
    }
}

impl ResilientProtocol {
    /// Inserts `document` into `collection`, returning its revision.
    pub async fn insert_document<D: TestDocument>(
        &self,
        db: &str,
        collection: &str,
        document: &D,
    ) -> Result<Option<String>, OperationError> {
        let mut mutation = InsertDocument {
            name: "insertDocument",
            path: format!("{}/_api/document/{}", db_path(db), collection),
            probe_path: document_path(db, collection, document.key()),
            document: document.clone(),
        };
        Ok(self.execute(&mut mutation).await?.revision)
    }

    /// Inserts a vertex through the graph API.
    pub async fn insert_vertex(
        &self,
        db: &str,
        graph: &str,
        collection: &str,
        vertex: &VertexDocument,
    ) -> Result<Option<String>, OperationError> {
        let mut mutation = InsertDocument {
            name: "insertVertex",
            path: format!("{}/_api/gharial/{}/vertex/{}", db_path(db), graph, collection),
            probe_path: document_path(db, collection, vertex.key()),
            document: vertex.clone(),
        };
        Ok(self.execute(&mut mutation).await?.revision)
    }

    /// Creates an edge through the graph API.
    pub async fn create_edge(
        &self,
        db: &str,
        graph: &str,
        collection: &str,
        edge: &EdgeDocument,
    ) -> Result<Option<String>, OperationError> {
        let mut mutation = InsertDocument {
            name: "createEdge",
            path: format!("{}/_api/gharial/{}/edge/{}", db_path(db), graph, collection),
            probe_path: document_path(db, collection, edge.key()),
            document: edge.clone(),
        };
        Ok(self.execute(&mut mutation).await?.revision)
    }

    /// Reads a document, returning `None` if it does not exist.
    pub async fn read_document<D: TestDocument>(
        &self,
        db: &str,
        collection: &str,
        key: &str,
    ) -> Result<Option<(D, Option<String>)>, OperationError> {
        let path = document_path(db, collection, key);
        let response = self.read("readDocument", Request::get(path.clone()).success(&[200, 404])).await?;
        if response.status == 404 {
            return Ok(None);
        }
        match serde_json::from_value::<D>(response.body.clone()) {
            Ok(document) => Ok(Some((document, response.revision))),
            Err(e) => Err(self.fail(
                "readDocument",
                FailureKind::Protocol,
                format!("GET {}: undecodable document: {}", path, e),
            )),
        }
    }

    /// Replaces `old` with `new`. With `revision` set the replacement is
    /// conditional on the stored revision.
    pub async fn update_document<D: TestDocument>(
        &self,
        db: &str,
        collection: &str,
        old: &D,
        new: &D,
        revision: Option<&str>,
    ) -> Result<Option<String>, OperationError> {
        let mut mutation = ReplaceDocument {
            path: document_path(db, collection, new.key()),
            old: old.clone(),
            new: new.clone(),
            revision: revision.map(str::to_string),
        };
        Ok(self.execute(&mut mutation).await?.revision)
    }

    /// Removes the document with `key`.
    pub async fn delete_document(
        &self,
        db: &str,
        collection: &str,
        key: &str,
    ) -> Result<(), OperationError> {
        let path = document_path(db, collection, key);
        let mut mutation = ResourceMutation {
            name: "deleteDocument",
            intent: Intent::Delete,
            request: Request::delete(path.clone()).success(&[200, 202]).failure(&[404, 500, 503]),
            probe_path: path,
        };
        self.execute(&mut mutation).await.map(|_| ())
    }
}
