//! Chunk request commands.

use anyhow::{Context, Result};
use serde::Deserialize;

use super::http::{StatusResponse, base_url, get_json, post_json_body};

#[derive(Deserialize)]
struct QueuesResponse {
    pending: Vec<u64>,
    downloaded: Vec<u64>,
    uploaded: Vec<u64>,
    failed: Vec<u64>,
}

pub async fn cmd_requests(port: u16) -> Result<()> {
    let resp: QueuesResponse = get_json(&format!("{}/chunk_requests", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Chunk Requests");
    println!("═══════════════════════════════════════");
    print_queue("Pending", &resp.pending);
    print_queue("Downloaded", &resp.downloaded);
    print_queue("Uploaded", &resp.uploaded);
    print_queue("Failed", &resp.failed);
    Ok(())
}

fn print_queue(label: &str, ids: &[u64]) {
    let shown: Vec<String> = ids.iter().take(20).map(|id| id.to_string()).collect();
    let more = if ids.len() > 20 {
        format!(" ... (+{})", ids.len() - 20)
    } else {
        String::new()
    };
    println!("  {:<11}: {:>6}  {}{}", label, ids.len(), shown.join(" "), more);
}

pub async fn cmd_request(port: u16, id: u64) -> Result<()> {
    let resp: serde_json::Value =
        get_json(&format!("{}/chunk_requests/{}", base_url(port), id)).await?;
    println!("{}", serde_json::to_string_pretty(&resp)?);
    Ok(())
}

/// Submit the request object (or list of objects) in a JSON file.
pub async fn cmd_submit(port: u16, path: &str) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path))?;
    let body: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not valid JSON", path))?;
    let count = body.as_array().map_or(1, Vec::len);

    let _: StatusResponse =
        post_json_body(&format!("{}/chunk_requests", base_url(port)), &body).await?;
    println!("Submitted {} chunk request(s).", count);
    Ok(())
}
