// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Test documents.
//!
//! Rechecks compare the stored document with what the workload wrote, so
//! every kind exposes its key and a content comparison that ignores
//! server-assigned fields.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Document kinds written by the workloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// A document in a plain collection.
    Plain,
    /// An edge between two vertices.
    Edge,
    /// A graph vertex.
    Vertex,
}

/// A document with a stable key and comparable content.
pub trait TestDocument: Serialize + DeserializeOwned + Clone + Send + Sync {
    /// The document's kind.
    const KIND: DocumentKind;

    /// Returns the document key.
    fn key(&self) -> &str;

    /// Returns true if `other` carries the same user content.
    fn same_content(&self, other: &Self) -> bool;

    /// Returns true if the stored `body` carries this document's content.
    fn matches(&self, body: &Value) -> bool {
        serde_json::from_value::<Self>(body.clone())
            .map(|stored| self.same_content(&stored))
            .unwrap_or(false)
    }

    /// Serializes the document for a request body.
    fn to_body(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A document in a plain collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlainDocument {
    /// Document key.
    #[serde(rename = "_key")]
    pub key: String,
    /// Payload that changes on update.
    pub value: i64,
    /// Free-form name.
    pub name: String,
    /// Number of updates applied.
    #[serde(default)]
    pub update_counter: u32,
}

impl PlainDocument {
    /// Creates a document for sequence number `seq`.
    pub fn new(seq: u64, value: i64) -> Self {
        Self { key: format!("doc{}", seq), value, name: format!("name {}", seq), update_counter: 0 }
    }

    /// Returns the next version of this document.
    pub fn updated(&self, value: i64) -> Self {
        Self { value, update_counter: self.update_counter + 1, ..self.clone() }
    }
}

impl TestDocument for PlainDocument {
    const KIND: DocumentKind = DocumentKind::Plain;

    fn key(&self) -> &str {
        &self.key
    }

    fn same_content(&self, other: &Self) -> bool {
        self == other
    }
}

/// A graph vertex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexDocument {
    /// Document key.
    #[serde(rename = "_key")]
    pub key: String,
    /// Smart-graph sharding attribute.
    pub region: String,
    /// Payload.
    pub value: i64,
}

impl TestDocument for VertexDocument {
    const KIND: DocumentKind = DocumentKind::Vertex;

    fn key(&self) -> &str {
        &self.key
    }

    fn same_content(&self, other: &Self) -> bool {
        self == other
    }
}

/// An edge between two vertices.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeDocument {
    /// Document key.
    #[serde(rename = "_key")]
    pub key: String,
    /// Source vertex id, `<collection>/<key>`.
    #[serde(rename = "_from")]
    pub from: String,
    /// Target vertex id, `<collection>/<key>`.
    #[serde(rename = "_to")]
    pub to: String,
    /// Payload.
    pub weight: i64,
}

impl TestDocument for EdgeDocument {
    const KIND: DocumentKind = DocumentKind::Edge;

    fn key(&self) -> &str {
        &self.key
    }

    fn same_content(&self, other: &Self) -> bool {
        self.from == other.from && self.to == other.to && self.weight == other.weight
    }
}
