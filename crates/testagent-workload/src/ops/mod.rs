// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Typed cluster operations built on the resilient protocol.
//!
//! Each submodule adds methods to [`ResilientProtocol`] for one resource
//! family. Mutations live here as small structs implementing [`Mutation`].

mod collection;
mod database;
mod document;
mod graph;
mod query;

use async_trait::async_trait;

pub use collection::CollectionSpec;
pub use graph::{EdgeDefinition, GraphSpec};

use crate::error::TransportError;
use crate::protocol::{Intent, Mutation, Observation, ResilientProtocol};
use crate::transport::{Request, Response};

/// Returns the path prefix for database `db`.
pub(crate) fn db_path(db: &str) -> String {
    format!("/_db/{}", db)
}

/// Reads `path`, mapping 200 to the response and 404 to `None`.
pub(crate) async fn lookup(
    protocol: &ResilientProtocol,
    path: &str,
) -> Result<Option<Response>, TransportError> {
    let response = protocol.fetch(Request::get(path).success(&[200]).failure(&[404])).await?;
    match response.status {
        200 => Ok(Some(response)),
        404 => Ok(None),
        status => Err(TransportError::UnexpectedStatus { status, path: path.to_string() }),
    }
}

/// Creates or drops a resource whose existence is readable at `probe_path`.
pub(crate) struct ResourceMutation {
    pub name: &'static str,
    pub intent: Intent,
    pub request: Request,
    pub probe_path: String,
}

#[async_trait]
impl Mutation for ResourceMutation {
    fn name(&self) -> &'static str {
        self.name
    }

    fn intent(&self) -> Intent {
        self.intent
    }

    fn request(&self) -> Request {
        self.request.clone()
    }

    async fn recheck(&mut self, protocol: &ResilientProtocol) -> Result<Observation, TransportError> {
        let found = lookup(protocol, &self.probe_path).await?;
        Ok(match (self.intent, found) {
            (Intent::Delete, None) => Observation::Applied(Response::new(404)),
            (Intent::Delete, Some(_)) => Observation::NotApplied,
            (_, Some(response)) => Observation::Applied(response),
            (_, None) => Observation::NotApplied,
        })
    }
}
