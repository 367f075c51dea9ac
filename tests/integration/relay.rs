//! Receiving chunks over the wire and forwarding them to the next hop.

use std::time::Duration;

use skylark_core::ChunkState;
use skylark_services::{GatewayControl, MemoryObjectStore};

use crate::*;

/// Path `[relay (this gateway), relay (next hop), dst]`: the gateway takes the
/// payload from a client connection and writes a correctly framed
/// header + payload to the next hop.
#[tokio::test]
async fn test_receive_then_forward() {
    let objects = MemoryObjectStore::new();
    let gateway = start_gateway_with(&objects, |c| c.gateway.initial_servers = 1).await;
    let port = first_port(&gateway).await;
    let next = FakePeer::listen().await.unwrap();

    let payload = sample_object(3000);
    gateway
        .add_chunk_request(request(
            chunk(21, 0, payload.len() as u64),
            vec![
                relay_hop(format!("127.0.0.1:{port}")),
                relay_hop(next.addr),
                dst_hop(),
            ],
        ))
        .unwrap();

    send_frames(port, &[(21, &payload)]).await.unwrap();

    wait_for_state(&gateway, 21, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();

    let frames = next.frames(Duration::from_secs(5)).await.unwrap();
    assert_eq!(frames.len(), 1);
    let (header, body) = &frames[0];
    assert_eq!(header.chunk_id, 21);
    assert_eq!(header.chunk_len, payload.len() as u64);
    assert!(header.end_of_stream);
    assert_eq!(&body[..], &payload[..]);

    gateway.shutdown().await;
}

/// A payload that arrives before its request is registered is held and used
/// once the request shows up.
#[tokio::test]
async fn test_payload_ahead_of_request() {
    let objects = MemoryObjectStore::new();
    let gateway = start_gateway_with(&objects, |c| c.gateway.initial_servers = 1).await;
    let port = first_port(&gateway).await;

    send_frames(port, &[(30, b"early bytes")]).await.unwrap();
    // Let the receive loop hand the payload off before registering.
    tokio::time::sleep(Duration::from_millis(100)).await;

    gateway
        .add_chunk_request(request(
            chunk(30, 0, 11),
            vec![relay_hop(format!("127.0.0.1:{port}")), dst_hop()],
        ))
        .unwrap();
    wait_for_state(&gateway, 30, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();

    let written = objects.object(&dst_bucket(), "datasets/train.bin").unwrap();
    assert_eq!(&written[..], b"early bytes");

    gateway.shutdown().await;
}

/// Several chunks on one inbound connection, delivered to a relay path and a
/// sink path.
#[tokio::test]
async fn test_many_frames_one_connection() {
    let objects = MemoryObjectStore::new();
    let gateway = start_gateway_with(&objects, |c| {
        c.gateway.initial_servers = 1;
        c.gateway.region = "local:test".into();
        c.storage.local_bucket = "sink".into();
    })
    .await;
    let port = first_port(&gateway).await;
    let me = format!("127.0.0.1:{port}");

    let a = sample_object(100);
    let b = sample_object(200);
    gateway
        .add_chunk_requests(vec![
            request(chunk(41, 0, 100), vec![relay_hop(&me), dst_hop()]),
            // Path ends here: bytes land in the local sink bucket.
            request(chunk(42, 100, 200), vec![relay_hop(&me)]),
        ])
        .unwrap();

    send_frames(port, &[(41, &a), (42, &b)]).await.unwrap();

    wait_for_state(&gateway, 41, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();
    wait_for_state(&gateway, 42, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();

    let dst = objects.object(&dst_bucket(), "datasets/train.bin").unwrap();
    assert_eq!(&dst[..100], &a[..]);
    let sink = objects
        .object(&skylark_services::BucketRef::new("local:test", "sink"), "datasets/train.bin")
        .unwrap();
    assert_eq!(&sink[100..300], &b[..]);

    gateway.shutdown().await;
}
