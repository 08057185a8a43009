// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (c) 2025 The Rucket Authors

//! Integration tests for the HTTP transport and the resilient protocol.
//!
//! These tests use wiremock to stand in for cluster coordinators.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use testagent_core::FailureCollector;
use testagent_workload::{
    CollectionSpec, FailureKind, HttpTransport, PlainDocument, ProtocolConfig, Request,
    ResilientProtocol, TestDocument, Transport,
};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn protocol(endpoints: Vec<String>) -> (ResilientProtocol, Arc<FailureCollector>) {
    let transport = Arc::new(HttpTransport::new(endpoints, "root", "").unwrap());
    let listener = Arc::new(FailureCollector::new());
    let config = ProtocolConfig {
        attempt_timeout: Duration::from_secs(2),
        deadline: Duration::from_secs(8),
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(50),
        transport_retries: 1,
    };
    (ResilientProtocol::new("integration", transport, config, listener.clone()), listener)
}

fn conflict() -> serde_json::Value {
    json!({"error": true, "code": 409, "errorNum": 1207, "errorMessage": "duplicate name"})
}

#[tokio::test]
async fn test_create_database_with_basic_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_api/database"))
        .and(header("authorization", "Basic cm9vdDo="))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"result": true})))
        .expect(1)
        .mount(&server)
        .await;

    let (protocol, listener) = protocol(vec![server.uri()]);
    protocol.create_database("db1", true).await.unwrap();

    assert!(listener.is_empty());
    assert_eq!(protocol.counters().get("createDatabase").unwrap().succeeded, 1);
}

#[tokio::test]
async fn test_first_attempt_conflict_is_fatal_without_recheck() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_db/db/_api/collection"))
        .respond_with(ResponseTemplate::new(409).set_body_json(conflict()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/db/_api/collection/c"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (protocol, listener) = protocol(vec![server.uri()]);
    let err = protocol
        .create_collection("db", &CollectionSpec::documents("c", 3, 2))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), Some(FailureKind::Rejected));
    let failures = listener.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].test, "integration");
    assert!(failures[0].message.contains("duplicate name"));
}

#[tokio::test]
async fn test_service_unavailable_resolved_by_recheck() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_db/db/_api/collection"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/db/_api/collection/c"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "c"})))
        .expect(1)
        .mount(&server)
        .await;

    let (protocol, listener) = protocol(vec![server.uri()]);
    protocol.create_collection("db", &CollectionSpec::documents("c", 3, 2)).await.unwrap();
    assert!(listener.is_empty());
}

#[tokio::test]
async fn test_cursor_batches_are_concatenated() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_db/db/_api/cursor"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"result": [1, 2], "hasMore": true, "id": "42"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/_db/db/_api/cursor/42"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": [3], "hasMore": false})),
        )
        .mount(&server)
        .await;

    let (protocol, _) = protocol(vec![server.uri()]);
    let results = protocol.query_all("db", "FOR d IN c RETURN d", json!({})).await.unwrap();
    assert_eq!(results, vec![json!(1), json!(2), json!(3)]);
}

#[tokio::test]
async fn test_revision_from_etag() {
    let server = MockServer::start().await;
    let document = PlainDocument::new(3, 30);
    Mock::given(method("GET"))
        .and(path("/_db/db/_api/document/c/doc3"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("ETag", "\"_etag9\"")
                .set_body_json(document.to_body()),
        )
        .mount(&server)
        .await;

    let (protocol, _) = protocol(vec![server.uri()]);
    let (read, revision) =
        protocol.read_document::<PlainDocument>("db", "c", "doc3").await.unwrap().unwrap();
    assert_eq!(read, document);
    assert_eq!(revision.as_deref(), Some("_etag9"));
}

#[tokio::test]
async fn test_refused_endpoint_rotates_to_next_coordinator() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/_api/version"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "3.12.0"})))
        .expect(1)
        .mount(&server)
        .await;

    // Nothing listens on port 1
    let transport =
        HttpTransport::new(vec!["http://127.0.0.1:1".to_string(), server.uri()], "root", "")
            .unwrap();
    let request = Request::get("/_api/version").timeout(Duration::from_secs(2)).retries(1);
    let response = transport.execute(&request).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.origin, server.uri());
    assert_eq!(response.body["version"], "3.12.0");
}

#[tokio::test]
async fn test_gateway_error_is_returned_without_resend() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_api/database"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let transport = HttpTransport::new(vec![server.uri()], "root", "").unwrap();
    let request = Request::post("/_api/database").json(json!({"name": "db"})).retries(3);
    assert_eq!(transport.execute(&request).await.unwrap().status, 502);
}

#[tokio::test]
async fn test_create_after_gateway_error_resolved_by_recheck() {
    let server = MockServer::start().await;
    // The first create lands behind a failing proxy, its resend conflicts with it
    Mock::given(method("POST"))
        .and(path("/_db/db/_api/collection"))
        .respond_with(ResponseTemplate::new(502))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/_db/db/_api/collection"))
        .respond_with(ResponseTemplate::new(409).set_body_json(conflict()))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/db/_api/collection/c"))
        .respond_with(ResponseTemplate::new(404))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/_db/db/_api/collection/c"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"name": "c"})))
        .expect(1)
        .mount(&server)
        .await;

    let (protocol, listener) = protocol(vec![server.uri()]);
    protocol.create_collection("db", &CollectionSpec::documents("c", 3, 2)).await.unwrap();

    assert!(listener.is_empty());
    let counter = protocol.counters().get("createCollection").unwrap();
    assert_eq!((counter.succeeded, counter.failed), (1, 0));
}

#[tokio::test]
async fn test_cursor_continuation_stays_on_owner() {
    let owner = MockServer::start().await;
    let other = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_db/db/_api/cursor"))
        .respond_with(
            ResponseTemplate::new(201)
                .set_body_json(json!({"result": [1], "hasMore": true, "id": "c1"})),
        )
        .expect(1)
        .mount(&owner)
        .await;
    Mock::given(method("PUT"))
        .and(path("/_db/db/_api/cursor/c1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": [2], "hasMore": true, "id": "c1"})),
        )
        .up_to_n_times(1)
        .expect(1)
        .mount(&owner)
        .await;
    Mock::given(method("PUT"))
        .and(path("/_db/db/_api/cursor/c1"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"result": [3], "hasMore": false})),
        )
        .expect(1)
        .mount(&owner)
        .await;
    // Any other coordinator has never heard of the cursor
    Mock::given(method("PUT"))
        .and(path("/_db/db/_api/cursor/c1"))
        .respond_with(ResponseTemplate::new(404))
        .expect(0)
        .mount(&other)
        .await;

    let (protocol, listener) = protocol(vec![owner.uri(), other.uri()]);
    let results = protocol.query_all("db", "FOR d IN c RETURN d", json!({})).await.unwrap();

    assert_eq!(results, vec![json!(1), json!(2), json!(3)]);
    assert!(listener.is_empty());
}
