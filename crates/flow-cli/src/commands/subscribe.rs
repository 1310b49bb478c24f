//! `flow subscribe <name>`: subscribe the agent to a flow, local or foreign.
//!
//! The subscription is created locally as `<prefix><name>`.

use anyhow::Result;

use fnaa_client::FnaaClient;

use super::exchange;

pub fn command(flow: &str, prefix: &str) -> String {
    format!("SUBSCRIBE {flow} LOCAL {prefix}{flow}")
}

pub async fn run(client: FnaaClient, flow: &str, prefix: &str) -> Result<Vec<String>> {
    Ok(exchange(client, &command(flow, prefix)).await?.data)
}
