//! `flowchat status`: query a running gateway's health endpoint.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde_json::Value;

use crate::terminal_output::{note_error, note_success};

pub async fn run(addr: SocketAddr) -> Result<bool> {
    let url = format!("http://{addr}/api/health");
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .context("Failed to build HTTP client")?;

    match client.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => {
            let body: Value = resp.json().await.context("Health endpoint returned invalid JSON")?;
            note_success(&format!("Flowchat is running on {addr}"));
            println!("{}", serde_json::to_string_pretty(&body)?);
            Ok(true)
        }
        Ok(resp) => {
            note_error(&format!("Health check on {addr} returned {}", resp.status()));
            Ok(false)
        }
        Err(_) => {
            note_error(&format!("Flowchat is not running on {addr}"));
            Ok(false)
        }
    }
}
