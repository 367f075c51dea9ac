//! Object store to object store, on one gateway and across two.

use std::time::Duration;

use skylark_core::ChunkState;
use skylark_services::{GatewayControl, MemoryObjectStore};

use crate::*;

/// Path `[src_object_store, dst_object_store]` on one gateway: the bytes at
/// the destination equal the declared range of the source.
#[tokio::test]
async fn test_src_to_dst_single_gateway() {
    let objects = MemoryObjectStore::new();
    let source = sample_object(4096);
    objects.insert_object(&src_bucket(), "datasets/train.bin", source.clone());
    let gateway = start_gateway(&objects).await;

    gateway
        .add_chunk_request(request(chunk(1, 1000, 1500), vec![src_hop(), dst_hop()]))
        .unwrap();
    wait_for_state(&gateway, 1, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();

    let written = objects.object(&dst_bucket(), "datasets/train.bin").unwrap();
    assert_eq!(&written[1000..2500], &source[1000..2500]);
    assert_eq!(gateway.chunk_requests().uploaded, vec![1]);

    gateway.shutdown().await;
}

/// Every chunk of a file, submitted as one batch, reassembles at the
/// destination regardless of completion order.
#[tokio::test]
async fn test_whole_file_in_chunks() {
    let objects = MemoryObjectStore::new();
    let source = sample_object(64 * 1024);
    objects.insert_object(&src_bucket(), "datasets/train.bin", source.clone());
    let gateway = start_gateway(&objects).await;

    let chunk_len = 4096u64;
    let batch = (0..16)
        .map(|i| request(chunk(100 + i, i * chunk_len, chunk_len), vec![src_hop(), dst_hop()]))
        .collect();
    gateway.add_chunk_requests(batch).unwrap();

    for i in 0..16 {
        wait_for_state(&gateway, 100 + i, ChunkState::UploadComplete, Duration::from_secs(5))
            .await
            .unwrap();
    }
    let written = objects.object(&dst_bucket(), "datasets/train.bin").unwrap();
    assert_eq!(&written[..], &source[..]);

    gateway.shutdown().await;
}

/// Two gateways: the first downloads and relays, the second receives and
/// uploads. Each tracks the chunk in its own store.
#[tokio::test]
async fn test_two_gateway_relay_chain() {
    let objects = MemoryObjectStore::new();
    let source = sample_object(8192);
    objects.insert_object(&src_bucket(), "datasets/train.bin", source.clone());

    let egress = start_gateway(&objects).await;
    let ingress = start_gateway_with(&objects, |c| c.gateway.initial_servers = 1).await;
    let ingress_addr = format!("127.0.0.1:{}", first_port(&ingress).await);

    let c = chunk(7, 2048, 4096);
    ingress
        .add_chunk_request(request(c.clone(), vec![relay_hop(&ingress_addr), dst_hop()]))
        .unwrap();
    egress
        .add_chunk_request(request(
            c,
            vec![src_hop(), relay_hop(&ingress_addr), dst_hop()],
        ))
        .unwrap();

    wait_for_state(&egress, 7, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();
    wait_for_state(&ingress, 7, ChunkState::UploadComplete, Duration::from_secs(5))
        .await
        .unwrap();

    let written = objects.object(&dst_bucket(), "datasets/train.bin").unwrap();
    assert_eq!(&written[2048..6144], &source[2048..6144]);

    // The egress gateway kept its own copy of the path it still had to travel.
    let egress_view = egress.chunk_request(7).unwrap();
    assert_eq!(egress_view.path.len(), 2);

    egress.shutdown().await;
    ingress.shutdown().await;
}
