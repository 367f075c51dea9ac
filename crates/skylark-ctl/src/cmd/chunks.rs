//! Chunk state commands.

use std::collections::BTreeMap;

use anyhow::Result;
use serde::Deserialize;

use super::http::{StatusResponse, base_url, delete_json, get_json};

#[derive(Deserialize)]
struct ChunkSnapshot {
    chunk_id: u64,
    key: String,
    state: String,
    file_offset_bytes: u64,
    chunk_length_bytes: u64,
    next_hop: Option<String>,
    remaining_hops: usize,
    updated_at: u64,
}

pub async fn cmd_chunks(port: u16) -> Result<()> {
    let resp: BTreeMap<String, ChunkSnapshot> =
        get_json(&format!("{}/chunks", base_url(port))).await?;

    if resp.is_empty() {
        println!("No chunks registered.");
        return Ok(());
    }

    let mut chunks: Vec<&ChunkSnapshot> = resp.values().collect();
    chunks.sort_by_key(|c| c.chunk_id);

    println!("═══════════════════════════════════════");
    println!("  Chunks ({})", chunks.len());
    println!("═══════════════════════════════════════");
    for c in chunks {
        println!(
            "  {:>10}  {:<22} {} [{}..+{}]",
            c.chunk_id, c.state, c.key, c.file_offset_bytes, c.chunk_length_bytes
        );
    }
    Ok(())
}

pub async fn cmd_chunk(port: u16, id: u64) -> Result<()> {
    let c: ChunkSnapshot = get_json(&format!("{}/chunks/{}", base_url(port), id)).await?;

    println!("  ┌─ chunk {}", c.chunk_id);
    println!("  │  key       : {}", c.key);
    println!("  │  state     : {}", c.state);
    println!("  │  range     : {}..{}", c.file_offset_bytes, c.file_offset_bytes + c.chunk_length_bytes);
    println!("  │  next hop  : {}", c.next_hop.as_deref().unwrap_or("-"));
    println!("  │  hops left : {}", c.remaining_hops);
    println!("  └─ updated   : {}", c.updated_at);
    Ok(())
}

pub async fn cmd_chunk_rm(port: u16, id: u64) -> Result<()> {
    let _: StatusResponse = delete_json(&format!("{}/chunks/{}", base_url(port), id)).await?;
    println!("Chunk {} removed.", id);
    Ok(())
}
