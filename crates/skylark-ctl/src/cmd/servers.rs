//! Chunk server commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{StatusResponse, base_url, delete_json, get_json, post_json};

#[derive(Deserialize)]
struct ServersResponse {
    server_ports: Vec<u16>,
}

#[derive(Deserialize)]
struct StartResponse {
    server_port: u16,
}

pub async fn cmd_servers(port: u16) -> Result<()> {
    let resp: ServersResponse = get_json(&format!("{}/servers", base_url(port))).await?;

    if resp.server_ports.is_empty() {
        println!("No chunk servers running.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Chunk Servers ({})", resp.server_ports.len());
    println!("═══════════════════════════════════════");
    for p in &resp.server_ports {
        println!("  port {}", p);
    }
    Ok(())
}

pub async fn cmd_servers_add(port: u16) -> Result<()> {
    let resp: StartResponse = post_json(&format!("{}/servers", base_url(port))).await?;
    println!("Chunk server started on port {}.", resp.server_port);
    Ok(())
}

pub async fn cmd_servers_rm(port: u16, server_port: u16) -> Result<()> {
    let resp: StatusResponse =
        delete_json(&format!("{}/servers/{}", base_url(port), server_port)).await?;
    println!("Chunk server on port {} stopped ({}).", server_port, resp.status);
    Ok(())
}
