// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! A scripted in-memory transport for tests.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;

use crate::error::TransportError;
use crate::transport::{Method, Request, Response, Transport};

#[derive(Debug)]
struct Step {
    method: Method,
    path: String,
    outcome: Result<Response, TransportError>,
    delay: Option<Duration>,
}

/// A [`Transport`] answering from a fixed script.
///
/// Each request consumes the next step. A step matches when the verb is the
/// same and the request path starts with the step's path. A mismatch or an
/// exhausted script answers with [`TransportError::Request`], which the
/// protocol treats as fatal, so an unexpected extra request fails the test.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    steps: Mutex<VecDeque<Step>>,
    requests: Mutex<Vec<Request>>,
    fallback: Mutex<Option<Response>>,
}

impl ScriptedTransport {
    /// Creates an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a step answering with `status` and an empty body.
    pub fn respond(self, method: Method, path: &str, status: u16) -> Self {
        self.push(method, path, Ok(Response::new(status)), None)
    }

    /// Appends a step answering with `status` and `body`.
    pub fn respond_json(self, method: Method, path: &str, status: u16, body: Value) -> Self {
        self.push(method, path, Ok(Response::with_body(status, body)), None)
    }

    /// Appends a step answering with a transport error.
    pub fn fail(self, method: Method, path: &str, error: TransportError) -> Self {
        self.push(method, path, Err(error), None)
    }

    /// Appends a step that times out.
    pub fn time_out(self, method: Method, path: &str) -> Self {
        let error = TransportError::Timeout { endpoint: "scripted".to_string(), timeout_ms: 0 };
        self.push(method, path, Err(error), None)
    }

    /// Appends a step that refuses the connection.
    pub fn refuse(self, method: Method, path: &str) -> Self {
        let error = TransportError::ConnectionRefused {
            endpoint: "scripted".to_string(),
            message: "connection refused".to_string(),
        };
        self.push(method, path, Err(error), None)
    }

    /// Appends a step that answers `status` after `delay`.
    pub fn respond_after(self, method: Method, path: &str, status: u16, delay: Duration) -> Self {
        self.push(method, path, Ok(Response::new(status)), Some(delay))
    }

    /// Answers every request beyond the script with `response` instead of an error.
    pub fn otherwise(self, response: Response) -> Self {
        *self.fallback.lock() = Some(response);
        self
    }

    fn push(
        self,
        method: Method,
        path: &str,
        outcome: Result<Response, TransportError>,
        delay: Option<Duration>,
    ) -> Self {
        self.steps.lock().push_back(Step { method, path: path.to_string(), outcome, delay });
        self
    }

    /// Returns every request executed so far.
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Returns the number of executed requests.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Returns the number of unconsumed steps.
    pub fn remaining(&self) -> usize {
        self.steps.lock().len()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        self.requests.lock().push(request.clone());
        let step = self.steps.lock().pop_front();
        let step = match step {
            Some(step) => step,
            None => {
                return match self.fallback.lock().clone() {
                    Some(response) => Ok(response),
                    None => Err(TransportError::Request(format!("unscripted request {}", request))),
                }
            }
        };
        if step.method != request.method || !request.path.starts_with(&step.path) {
            return Err(TransportError::Request(format!(
                "expected {} {}, got {}",
                step.method, step.path, request
            )));
        }
        if let Some(delay) = step.delay {
            tokio::time::sleep(delay).await;
        }
        step.outcome
    }
}
