//! skylark-ctl — command-line interface for the Skylark gateway daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 8080;

fn print_usage() {
    println!("Usage: skylark-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  servers             List running chunk servers");
    println!("  servers add         Start a chunk server");
    println!("  servers rm <port>   Stop the chunk server on <port>");
    println!("  chunks              List chunks and their states");
    println!("  chunk <id>          Show one chunk");
    println!("  chunk rm <id>       Forget a finished or failed chunk");
    println!("  requests            Show pending/downloaded/uploaded/failed queues");
    println!("  request <id>        Print a stored chunk request as JSON");
    println!("  submit <file.json>  Register the request(s) in a JSON file");
    println!();
    println!("Options:");
    println!("  --port <port>   Control API port (default: {})", DEFAULT_PORT);
}

fn parse_id(s: &str) -> Result<u64> {
    s.parse().with_context(|| format!("invalid id: {}", s))
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    // Parse --port option
    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["servers"] | []               => cmd::servers::cmd_servers(port).await,
        ["servers", "add"]             => cmd::servers::cmd_servers_add(port).await,
        ["servers", "rm", p]           => {
            let server_port = p.parse().with_context(|| format!("invalid port: {}", p))?;
            cmd::servers::cmd_servers_rm(port, server_port).await
        }
        ["chunks"]                     => cmd::chunks::cmd_chunks(port).await,
        ["chunk", "rm", id]            => cmd::chunks::cmd_chunk_rm(port, parse_id(id)?).await,
        ["chunk", id]                  => cmd::chunks::cmd_chunk(port, parse_id(id)?).await,
        ["requests"]                   => cmd::requests::cmd_requests(port).await,
        ["request", id]                => cmd::requests::cmd_request(port, parse_id(id)?).await,
        ["submit", path]               => cmd::requests::cmd_submit(port, path).await,
        ["help"] | ["--help"] | ["-h"] => { print_usage(); Ok(()) }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
