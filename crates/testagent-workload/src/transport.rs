// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! The workload transport abstraction.
//!
//! A transport executes one logical request, performing its own low-level
//! retries only for failures where nothing reached the server. Every HTTP
//! response is handed back, and application-level ambiguity is resolved on
//! top of it by the resilient protocol.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::TransportError;

/// HTTP verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the uppercase verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    /// HTTP verb.
    pub method: Method,
    /// Path including any `/_db/<name>` prefix.
    pub path: String,
    /// Query parameters.
    pub query: Vec<(String, String)>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// JSON body.
    pub body: Option<Value>,
    /// Statuses that mean the request did what it was asked.
    pub success_codes: Vec<u16>,
    /// Statuses that are expected, definite failures of the request.
    pub failure_codes: Vec<u16>,
    /// Per-attempt timeout.
    pub timeout: Duration,
    /// Low-level retry budget for refused connections.
    pub retries: u32,
    /// Base URL that must serve the request, e.g. the owner of a cursor.
    /// Any coordinator may serve it when unset.
    pub endpoint: Option<String>,
}

impl Request {
    /// Creates a request with no body and default timing.
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            headers: Vec::new(),
            body: None,
            success_codes: vec![200],
            failure_codes: Vec::new(),
            timeout: Duration::from_secs(30),
            retries: 0,
            endpoint: None,
        }
    }

    /// Creates a GET request.
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// Creates a POST request.
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// Creates a PUT request.
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::Put, path)
    }

    /// Creates a DELETE request.
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Adds a query parameter.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Adds a header.
    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Sets the JSON body.
    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Sets the success statuses.
    pub fn success(mut self, codes: &[u16]) -> Self {
        self.success_codes = codes.to_vec();
        self
    }

    /// Sets the statuses that are expected failures.
    pub fn failure(mut self, codes: &[u16]) -> Self {
        self.failure_codes = codes.to_vec();
        self
    }

    /// Sets the per-attempt timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the low-level retry budget.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    /// Pins the request to the coordinator at `endpoint`.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Returns true if `status` is a declared success.
    pub fn is_success(&self, status: u16) -> bool {
        self.success_codes.contains(&status)
    }

    /// Returns true if `status` is declared in either set.
    pub fn is_declared(&self, status: u16) -> bool {
        self.is_success(status) || self.failure_codes.contains(&status)
    }
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// The server's error envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// HTTP status echoed in the body.
    pub code: u16,
    /// Server-specific error number.
    #[serde(rename = "errorNum")]
    pub error_num: i64,
    /// Error message.
    #[serde(rename = "errorMessage")]
    pub message: String,
}

impl ServerError {
    /// Extracts the error envelope from a response body, if present.
    pub fn from_body(body: &Value) -> Option<Self> {
        if body.get("error").and_then(Value::as_bool) != Some(true) {
            return None;
        }
        serde_json::from_value(body.clone()).ok()
    }
}

/// A response from the cluster.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// HTTP status.
    pub status: u16,
    /// Error envelope, if the server sent one.
    pub server_error: Option<ServerError>,
    /// Document revision from the `ETag` header or the body's `_rev`.
    pub revision: Option<String>,
    /// Base URL of the coordinator that answered.
    pub origin: String,
    /// Decoded JSON body, `Null` when empty.
    pub body: Value,
}

impl Response {
    /// Creates a response with an empty body.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            server_error: None,
            revision: None,
            origin: String::new(),
            body: Value::Null,
        }
    }

    /// Creates a response with a JSON body, deriving the error envelope and revision.
    pub fn with_body(status: u16, body: Value) -> Self {
        let server_error = ServerError::from_body(&body);
        let revision = body.get("_rev").and_then(Value::as_str).map(str::to_string);
        Self { status, server_error, revision, origin: String::new(), body }
    }

    /// Returns a one-line description for failure messages.
    pub fn describe(&self) -> String {
        match &self.server_error {
            Some(e) => format!(
                "status {} from {} (errorNum {}: {})",
                self.status, self.origin, e.error_num, e.message
            ),
            None => format!("status {} from {}", self.status, self.origin),
        }
    }
}

/// Executes requests against the cluster.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Executes `request`, retrying internally only where nothing reached the server.
    ///
    /// Any HTTP response is returned as `Ok`, whatever its status; status
    /// interpretation is the caller's concern.
    async fn execute(&self, request: &Request) -> Result<Response, TransportError>;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_builder() {
        let request = Request::post("/_api/collection")
            .query("waitForSync", "true")
            .header("If-Match", "abc")
            .json(json!({"name": "c"}))
            .success(&[200, 201])
            .failure(&[409])
            .timeout(Duration::from_secs(3))
            .retries(2)
            .endpoint("http://c2:8529");

        assert_eq!(request.to_string(), "POST /_api/collection");
        assert!(request.is_success(201));
        assert!(request.is_declared(409));
        assert!(!request.is_declared(503));
        assert_eq!(request.retries, 2);
        assert_eq!(request.endpoint.as_deref(), Some("http://c2:8529"));
    }

    #[test]
    fn test_server_error_from_body() {
        let body = json!({
            "error": true,
            "code": 409,
            "errorNum": 1207,
            "errorMessage": "duplicate name"
        });
        let response = Response::with_body(409, body);
        let error = response.server_error.clone().unwrap();
        assert_eq!(error.error_num, 1207);
        assert!(response.describe().contains("duplicate name"));

        let response = Response::with_body(200, json!({"_key": "a", "_rev": "_x1"}));
        assert!(response.server_error.is_none());
        assert_eq!(response.revision.as_deref(), Some("_x1"));
    }
}
