//! Failure paths: every failure ends in `failed`, never in `upload_complete`.

use std::time::Duration;

use skylark_core::wire::write_header;
use skylark_core::{ChunkState, WireProtocolHeader};
use skylark_services::{GatewayControl, MemoryObjectStore};
use tokio::io::AsyncWriteExt;

use crate::control::get_json;
use crate::*;

/// Relaying to a port with nothing listening fails the chunk within the
/// configured timeout, and the API reports it as failed.
#[tokio::test]
async fn test_unreachable_relay_fails() {
    let objects = MemoryObjectStore::new();
    objects.insert_object(&src_bucket(), "datasets/train.bin", sample_object(1024));
    let gateway = start_gateway(&objects).await;

    let dead = format!("127.0.0.1:{}", closed_port());
    gateway
        .add_chunk_request(request(
            chunk(50, 0, 512),
            vec![src_hop(), relay_hop(dead), dst_hop()],
        ))
        .unwrap();

    let timeout = Duration::from_millis(gateway.config().transfer.connect_timeout_ms)
        + Duration::from_secs(2);
    wait_for_state(&gateway, 50, ChunkState::Failed, timeout)
        .await
        .unwrap();

    let app = skylark_api::router(skylark_api::ApiState::new(std::sync::Arc::new(
        gateway.clone(),
    )));
    let queues = get_json(&app, "/api/v1/chunk_requests").await;
    assert_eq!(queues["failed"], serde_json::json!([50]));
    assert_eq!(queues["uploaded"], serde_json::json!([]));

    gateway.shutdown().await;
}

/// No inbound payload within the hop timeout fails a relay-head chunk.
#[tokio::test]
async fn test_missing_inbound_payload_times_out() {
    let objects = MemoryObjectStore::new();
    let gateway = start_gateway_with(&objects, |c| c.transfer.hop_timeout_ms = 200).await;

    gateway
        .add_chunk_request(request(
            chunk(51, 0, 8),
            vec![relay_hop("127.0.0.1:1"), dst_hop()],
        ))
        .unwrap();
    wait_for_state(&gateway, 51, ChunkState::Failed, Duration::from_secs(3))
        .await
        .unwrap();
    assert!(!gateway.chunk_requests().uploaded.contains(&51));

    gateway.shutdown().await;
}

/// A garbage header closes only its own connection; the listener keeps
/// serving and a later well-formed connection still delivers.
#[tokio::test]
async fn test_bad_frame_only_drops_its_connection() {
    let objects = MemoryObjectStore::new();
    let gateway = start_gateway_with(&objects, |c| c.gateway.initial_servers = 1).await;
    let port = first_port(&gateway).await;

    let mut bad = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    bad.write_all(b"this is definitely not a skylark header").await.unwrap();

    // A header that declares more bytes than are ever sent.
    let mut short = tokio::net::TcpStream::connect(("127.0.0.1", port)).await.unwrap();
    write_header(&mut short, &WireProtocolHeader::new(60, 1000, true))
        .await
        .unwrap();
    short.write_all(b"partial").await.unwrap();
    drop(short);

    gateway
        .add_chunk_request(request(
            chunk(61, 0, 4),
            vec![relay_hop(format!("127.0.0.1:{port}")), dst_hop()],
        ))
        .unwrap();
    send_frames(port, &[(61, b"good")]).await.unwrap();

    wait_for_state(&gateway, 61, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(gateway.server_ports(), vec![port]);

    gateway.shutdown().await;
}

/// A chunk whose source object is missing fails; its siblings still finish.
#[tokio::test]
async fn test_one_failure_does_not_stop_siblings() {
    let objects = MemoryObjectStore::new();
    objects.insert_object(&src_bucket(), "datasets/train.bin", sample_object(300));
    let gateway = start_gateway(&objects).await;

    let mut orphan = request(chunk(72, 0, 100), vec![src_hop(), dst_hop()]);
    orphan.chunk.key = "datasets/missing.bin".into();
    gateway
        .add_chunk_requests(vec![
            request(chunk(71, 0, 100), vec![src_hop(), dst_hop()]),
            orphan,
            request(chunk(73, 200, 100), vec![src_hop(), dst_hop()]),
        ])
        .unwrap();

    for id in [71, 73] {
        wait_for_state(&gateway, id, ChunkState::UploadComplete, Duration::from_secs(5))
            .await
            .unwrap();
    }
    wait_for_state(&gateway, 72, ChunkState::Failed, Duration::from_secs(5))
        .await
        .unwrap();

    let queues = gateway.chunk_requests();
    assert_eq!(queues.uploaded, vec![71, 73]);
    assert_eq!(queues.failed, vec![72]);

    gateway.shutdown().await;
}
