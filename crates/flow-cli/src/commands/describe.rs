//! `flow describe flow <name>`: show where a flow lives.

use anyhow::Result;

use fnaa_client::FnaaClient;

use super::exchange;

pub fn command(flow: &str) -> String {
    format!("DESCRIBE FLOW {flow}")
}

/// Describe `flow`; returns its `key=value` lines.
pub async fn run(client: FnaaClient, flow: &str) -> Result<Vec<String>> {
    Ok(exchange(client, &command(flow)).await?.data)
}
