// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! HTTP transport over the cluster's coordinators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{TransportError, WorkloadError};
use crate::transport::{Method, Request, Response, ServerError, Transport};

/// Pause between low-level retries.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// A [`Transport`] that spreads requests over coordinator endpoints.
///
/// Each attempt goes to the next endpoint in round-robin order, so a retry
/// after a refused connection lands on a different coordinator. Requests
/// pinned to an endpoint always go there.
///
/// Only refused connections are retried. Any HTTP response, including a
/// gateway error, may mean the request was applied and is returned as is.
#[derive(Debug)]
pub struct HttpTransport {
    client: Client,
    endpoints: Vec<String>,
    username: String,
    password: String,
    next: AtomicUsize,
}

impl HttpTransport {
    /// Creates a transport over `endpoints` using basic authentication.
    ///
    /// # Errors
    ///
    /// Returns an error if `endpoints` is empty or the client cannot be built.
    pub fn new(
        endpoints: Vec<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<Self, WorkloadError> {
        if endpoints.is_empty() {
            return Err(WorkloadError::NoEndpoints);
        }
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| WorkloadError::Client(e.to_string()))?;
        let endpoints = endpoints.into_iter().map(|e| e.trim_end_matches('/').to_string()).collect();

        Ok(Self {
            client,
            endpoints,
            username: username.into(),
            password: password.into(),
            next: AtomicUsize::new(0),
        })
    }

    /// Returns the configured endpoints.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn next_endpoint(&self) -> &str {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.endpoints.len();
        &self.endpoints[index]
    }

    fn endpoint_for(&self, request: &Request) -> String {
        match &request.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => self.next_endpoint().to_string(),
        }
    }

    async fn attempt(&self, endpoint: &str, request: &Request) -> Result<Response, TransportError> {
        let method = match request.method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .client
            .request(method, format!("{}{}", endpoint, request.path))
            .query(&request.query)
            .basic_auth(&self.username, Some(&self.password))
            .timeout(request.timeout);
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| classify_error(endpoint, request, e))?;

        let status = response.status().as_u16();
        let etag = response
            .headers()
            .get(reqwest::header::ETAG)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim_matches('"').to_string());
        let bytes = response.bytes().await.map_err(|e| classify_error(endpoint, request, e))?;

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .map_err(|e| TransportError::Decode(format!("{} from {}: {}", request, endpoint, e)))?
        };

        let revision =
            etag.or_else(|| body.get("_rev").and_then(Value::as_str).map(str::to_string));
        Ok(Response {
            status,
            server_error: ServerError::from_body(&body),
            revision,
            origin: endpoint.to_string(),
            body,
        })
    }
}

fn classify_error(endpoint: &str, request: &Request, error: reqwest::Error) -> TransportError {
    if error.is_timeout() {
        TransportError::Timeout {
            endpoint: endpoint.to_string(),
            timeout_ms: request.timeout.as_millis() as u64,
        }
    } else if error.is_connect() {
        TransportError::ConnectionRefused {
            endpoint: endpoint.to_string(),
            message: error.to_string(),
        }
    } else if error.is_decode() {
        TransportError::Decode(error.to_string())
    } else {
        TransportError::Request(format!("{} to {}: {}", request, endpoint, error))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &Request) -> Result<Response, TransportError> {
        let mut tries = 0;
        loop {
            let endpoint = self.endpoint_for(request);
            let last = tries >= request.retries;
            counter!("testagent_http_requests_total", "method" => request.method.as_str())
                .increment(1);

            match self.attempt(&endpoint, request).await {
                Ok(response) => {
                    debug!(
                        request = %request,
                        endpoint = %endpoint,
                        status = response.status,
                        "Request answered"
                    );
                    return Ok(response);
                }
                Err(e @ TransportError::ConnectionRefused { .. }) if !last => {
                    warn!(
                        request = %request,
                        error = %e,
                        attempt = tries + 1,
                        "Connection refused, retrying"
                    );
                }
                Err(e) => return Err(e),
            }

            tries += 1;
            tokio::time::sleep(RETRY_DELAY).await;
        }
    }
}
