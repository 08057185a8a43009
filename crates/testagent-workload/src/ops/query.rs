// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Read-only cursor queries.
//!
//! A query creates a server-side cursor and fetches further batches from it.
//! Batches are served by the coordinator that owns the cursor, so every
//! continuation is pinned to the coordinator that created it and losing that
//! coordinator loses the cursor. Any ambiguous failure or lost cursor
//! restarts the whole query, which is safe because it only reads.

use std::time::Instant;

use serde_json::{json, Value};
use tracing::debug;

use super::db_path;
use crate::error::{FailureKind, OperationError, TransportError};
use crate::protocol::{is_transient, Backoff, ResilientProtocol};
use crate::transport::{Request, Response};

const OPERATION: &str = "queryDocuments";
const BATCH_SIZE: u32 = 100;

/// Which cursor request is being judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Create,
    Continue,
}

enum Fetch {
    Batch(Response),
    Restart(String),
    Fatal(FailureKind, String),
}

enum Drained {
    Done(Vec<Value>),
    Restart(String),
    Fatal(FailureKind, String),
}

impl From<Fetch> for Drained {
    fn from(fetch: Fetch) -> Self {
        match fetch {
            Fetch::Batch(_) => Drained::Restart("cursor batch without results".to_string()),
            Fetch::Restart(reason) => Drained::Restart(reason),
            Fetch::Fatal(kind, detail) => Drained::Fatal(kind, detail),
        }
    }
}

fn judge(stage: Stage, request: &Request, outcome: Result<Response, TransportError>) -> Fetch {
    match outcome {
        Ok(response) if request.is_success(response.status) => Fetch::Batch(response),
        // Only a continuation can lose its cursor; on creation the queried data is missing
        Ok(response) if response.status == 404 && stage == Stage::Continue => {
            Fetch::Restart(format!("cursor lost: {}", response.describe()))
        }
        Ok(response) if response.status == 404 => Fetch::Fatal(
            FailureKind::Contradiction,
            format!("{}: queried collection missing: {}", request, response.describe()),
        ),
        Ok(response) if is_transient(response.status) => Fetch::Restart(response.describe()),
        Ok(response) => {
            Fetch::Fatal(FailureKind::Protocol, format!("{}: {}", request, response.describe()))
        }
        Err(e @ TransportError::ConnectionRefused { .. })
        | Err(e @ TransportError::Timeout { .. }) => Fetch::Restart(e.to_string()),
        Err(e) => Fetch::Fatal(FailureKind::Transport, format!("{}: {}", request, e)),
    }
}

fn batch(response: &Response) -> Result<(Vec<Value>, Option<String>), String> {
    let result = response
        .body
        .get("result")
        .and_then(Value::as_array)
        .cloned()
        .ok_or_else(|| format!("cursor response without result: {}", response.body))?;
    let has_more = response.body.get("hasMore").and_then(Value::as_bool).unwrap_or(false);
    let id = match response.body.get("id") {
        Some(Value::String(id)) if has_more => Some(id.clone()),
        Some(Value::Number(id)) if has_more => Some(id.to_string()),
        _ if has_more => return Err(format!("cursor has more results but no id: {}", response.body)),
        _ => None,
    };
    Ok((result, id))
}

impl ResilientProtocol {
    /// Runs an AQL query and returns every result.
    pub async fn query_all(
        &self,
        db: &str,
        query: &str,
        bind_vars: Value,
    ) -> Result<Vec<Value>, OperationError> {
        let started = Instant::now();
        let deadline = started + self.config().deadline;
        let mut backoff = Backoff::new(self.config().initial_backoff, self.config().max_backoff);
        let create = self.prepare(
            Request::post(format!("{}/_api/cursor", db_path(db)))
                .json(json!({ "query": query, "bindVars": bind_vars, "batchSize": BATCH_SIZE }))
                .success(&[201])
                .failure(&[404, 500, 503]),
        );
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let reason = match self.drain_cursor(db, &create).await? {
                Drained::Done(results) => {
                    let response = Response::with_body(200, json!({ "count": results.len() }));
                    self.succeed(OPERATION, started, response);
                    return Ok(results);
                }
                Drained::Fatal(kind, detail) => {
                    let message = format!("attempt {}: {}", attempt, detail);
                    return Err(self.fail(OPERATION, kind, message));
                }
                Drained::Restart(reason) => reason,
            };

            let delay = backoff.next_delay();
            if Instant::now() + delay >= deadline {
                let message = format!("{} unresolved after {} attempts: {}", create, attempt, reason);
                return Err(self.fail(OPERATION, FailureKind::Timeout, message));
            }
            debug!(operation = OPERATION, attempt, reason = %reason, "Restarting query");
            self.gate().sleep(delay).await?;
        }
    }

    /// Drains one cursor. The error is a cooperative stop.
    async fn drain_cursor(&self, db: &str, create: &Request) -> Result<Drained, OperationError> {
        self.gate().check_in().await?;
        let mut response = match judge(Stage::Create, create, self.send(create).await) {
            Fetch::Batch(response) => response,
            other => return Ok(other.into()),
        };
        let origin = response.origin.clone();

        let mut results = Vec::new();
        loop {
            let (mut batch, cursor) = match batch(&response) {
                Ok(batch) => batch,
                Err(detail) => return Ok(Drained::Fatal(FailureKind::Protocol, detail)),
            };
            results.append(&mut batch);
            let Some(cursor) = cursor else {
                return Ok(Drained::Done(results));
            };

            self.gate().check_in().await?;
            let mut next = Request::put(format!("{}/_api/cursor/{}", db_path(db), cursor))
                .success(&[200])
                .failure(&[404, 500, 503]);
            if !origin.is_empty() {
                next = next.endpoint(origin.clone());
            }
            let next = self.prepare(next);
            response = match judge(Stage::Continue, &next, self.send(&next).await) {
                Fetch::Batch(response) => response,
                other => return Ok(other.into()),
            };
        }
    }
}
