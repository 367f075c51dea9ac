//! The HTTP control API against a real gateway.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use skylark_api::ApiState;
use skylark_core::ChunkState;
use skylark_services::{GatewayControl, MemoryObjectStore};

use crate::*;

pub fn api(gateway: &Gateway) -> Router {
    skylark_api::router(ApiState::new(Arc::new(gateway.clone())))
}

pub async fn call(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

pub async fn get_json(app: &Router, uri: &str) -> Value {
    let (status, value) = call(app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::OK, "GET {uri}: {value}");
    value
}

#[tokio::test]
async fn test_server_lifecycle_over_http() {
    let objects = MemoryObjectStore::new();
    let gateway = start_gateway(&objects).await;
    let app = api(&gateway);

    assert_eq!(get_json(&app, "/api/v1/servers").await["server_ports"], json!([]));

    let (status, started) = call(&app, "POST", "/api/v1/servers", None).await;
    assert_eq!(status, StatusCode::OK);
    let port = started["server_port"].as_u64().unwrap();
    assert_eq!(get_json(&app, "/api/v1/servers").await["server_ports"], json!([port]));

    // The listener is real.
    tokio::net::TcpStream::connect(("127.0.0.1", port as u16))
        .await
        .unwrap();

    let (status, body) = call(&app, "DELETE", &format!("/api/v1/servers/{port}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(get_json(&app, "/api/v1/servers").await["server_ports"], json!([]));

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_stop_unknown_port_leaves_servers_alone() {
    let objects = MemoryObjectStore::new();
    let gateway = start_gateway_with(&objects, |c| c.gateway.initial_servers = 2).await;
    let app = api(&gateway);
    let before = gateway.server_ports();
    assert_eq!(before.len(), 2);

    let unknown = closed_port();
    let (status, body) = call(&app, "DELETE", &format!("/api/v1/servers/{unknown}"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains(&unknown.to_string()));
    assert_eq!(gateway.server_ports(), before);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_submit_then_inspect() {
    let objects = MemoryObjectStore::new();
    objects.insert_object(&src_bucket(), "datasets/train.bin", sample_object(2048));
    let gateway = start_gateway(&objects).await;
    let app = api(&gateway);

    let body = request(chunk(90, 0, 1024), vec![src_hop(), dst_hop()])
        .to_value()
        .unwrap();
    let (status, reply) = call(&app, "POST", "/api/v1/chunk_requests", Some(body)).await;
    assert_eq!(status, StatusCode::OK, "{reply}");

    wait_for_state(&gateway, 90, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();

    let chunk = get_json(&app, "/api/v1/chunks/90").await;
    assert_eq!(chunk["state"], "upload_complete");
    assert_eq!(chunk["chunk_length_bytes"], 1024);

    let all = get_json(&app, "/api/v1/chunks").await;
    assert_eq!(all["90"]["state"], "upload_complete");

    let queues = get_json(&app, "/api/v1/chunk_requests").await;
    assert_eq!(queues["uploaded"], json!([90]));
    assert_eq!(queues["pending"], json!([]));

    let (status, _) = call(&app, "GET", "/api/v1/chunks/404", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = call(&app, "DELETE", "/api/v1/chunks/90", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = call(&app, "GET", "/api/v1/chunks/90", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    gateway.shutdown().await;
}

#[tokio::test]
async fn test_submit_invalid_batch_registers_nothing() {
    let objects = MemoryObjectStore::new();
    let gateway = start_gateway(&objects).await;
    let app = api(&gateway);

    let good = request(chunk(91, 0, 10), vec![src_hop(), dst_hop()])
        .to_value()
        .unwrap();
    let empty_path = request(chunk(92, 0, 10), vec![]).to_value().unwrap();
    let (status, _) = call(
        &app,
        "POST",
        "/api/v1/chunk_requests",
        Some(json!([good, empty_path])),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(gateway.chunks().is_empty());

    gateway.shutdown().await;
}
