//! `flow create flow <name>`: create a flow in the agent's namespace.

use anyhow::{bail, Result};
use tracing::info;

use fnaa_client::FnaaClient;

use super::exchange;

pub fn command(flow: &str) -> String {
    format!("CREATE FLOW {flow}")
}

pub async fn run(client: FnaaClient, flow: &str) -> Result<String> {
    let response = exchange(client, &command(flow)).await?;
    // The agent echoes the created name: `220 OK <flow>`.
    match response.message.strip_prefix("OK").map(str::trim) {
        Some(created) if !created.is_empty() => {
            info!(flow = %created, "flow created");
            Ok(format!("Flow {created} created"))
        }
        _ => bail!("unexpected reply to CREATE: {}", response.message),
    }
}
