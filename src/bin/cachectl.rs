//! cachectl - command line client for a distcache cluster
//!
//! Talks to the load balancer, which routes each command to the master or a
//! replica.
//!
//! Usage:
//!   cachectl set <key> <value> [--ttl-ms N]
//!   cachectl get <key>
//!   cachectl del <key>
//!   cachectl flushall
//!   cachectl showall
//!   cachectl info

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::json;

#[derive(Parser)]
#[command(name = "cachectl")]
#[command(about = "Query and update a distcache cluster", long_about = None)]
struct Cli {
    /// Load balancer endpoint
    #[arg(short, long, default_value = "http://127.0.0.1:8888")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Store a value
    Set {
        key: String,
        value: String,
        /// Expire after this many milliseconds (0 = never)
        #[arg(long, default_value_t = 0)]
        ttl_ms: u64,
    },
    /// Fetch a value
    Get { key: String },
    /// Delete a key
    Del { key: String },
    /// Drop every key
    Flushall,
    /// List every entry in recency order
    Showall,
    /// Show master status and connected replicas
    Info,
}

#[derive(Deserialize)]
struct GetResponse {
    value: String,
}

#[derive(Deserialize)]
struct AllEntriesResponse {
    entries: BTreeMap<String, String>,
    queue: Vec<String>,
}

#[derive(Deserialize)]
struct ReplicaInfo {
    #[serde(rename = "nodeId")]
    node_id: u64,
    #[serde(rename = "nodeIpAddr")]
    node_ip_addr: String,
    port: String,
}

#[derive(Deserialize)]
struct ServerInfo {
    status: String,
    role: String,
    start_time: String,
    connected_replicas: Vec<ReplicaInfo>,
    number_of_replicas: usize,
    total_entries: usize,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let endpoint = cli.endpoint.trim_end_matches('/');
    let client = reqwest::Client::new();

    match cli.command {
        Commands::Set { key, value, ttl_ms } => {
            let response = client
                .post(format!("{}/cache/set", endpoint))
                .json(&json!({ "key": key, "value": value, "ttl_ms": ttl_ms }))
                .send()
                .await
                .context("Request failed")?;
            check(response).await?;
            println!("OK");
        }
        Commands::Get { key } => {
            let response = client
                .get(format!("{}/cache/get", endpoint))
                .query(&[("key", &key)])
                .send()
                .await
                .context("Request failed")?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                println!("(nil)");
                return Ok(());
            }
            let body: GetResponse = check(response).await?.json().await?;
            println!("{}", body.value);
        }
        Commands::Del { key } => {
            let response = client
                .delete(format!("{}/cache/delete", endpoint))
                .query(&[("key", &key)])
                .send()
                .await
                .context("Request failed")?;
            if response.status() == reqwest::StatusCode::NOT_FOUND {
                println!("(integer) 0");
                return Ok(());
            }
            check(response).await?;
            println!("(integer) 1");
        }
        Commands::Flushall => {
            let response = client
                .post(format!("{}/cache/reset", endpoint))
                .send()
                .await
                .context("Request failed")?;
            check(response).await?;
            println!("OK");
        }
        Commands::Showall => {
            let response = client
                .get(format!("{}/cache/getAll", endpoint))
                .send()
                .await
                .context("Request failed")?;
            let all: AllEntriesResponse = check(response).await?.json().await?;
            if all.queue.is_empty() {
                println!("(empty)");
            }
            for (i, key) in all.queue.iter().enumerate() {
                let value = all.entries.get(key).map(String::as_str).unwrap_or("");
                println!("{}) {} = {}", i + 1, key, value);
            }
        }
        Commands::Info => {
            let response = client
                .get(format!("{}/server/info", endpoint))
                .send()
                .await
                .context("Request failed")?;
            let info: ServerInfo = check(response).await?.json().await?;

            println!("Status:   {}", info.status);
            println!("Role:     {}", info.role);
            println!("Started:  {}", info.start_time);
            println!("Entries:  {}", info.total_entries);
            println!("Replicas: {}", info.number_of_replicas);
            if !info.connected_replicas.is_empty() {
                println!();
                println!("{:<12} {:<20} {:<8}", "NODE ID", "ADDRESS", "PORT");
                println!("{}", "-".repeat(42));
                for replica in &info.connected_replicas {
                    println!(
                        "{:<12} {:<20} {:<8}",
                        replica.node_id, replica.node_ip_addr, replica.port
                    );
                }
            }
        }
    }

    Ok(())
}

/// Turns a non-success response into an error carrying the server's message.
async fn check(response: reqwest::Response) -> anyhow::Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => bail!("{} ({})", body.error, status),
        Err(_) => bail!("API error: {} {}", status, text),
    }
}
