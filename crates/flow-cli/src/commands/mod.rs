//! CLI subcommand implementations.
//!
//! Every subcommand is one request/response exchange: connect, send one
//! command, QUIT, then render the reply.

pub mod create;
pub mod describe;
pub mod get;
pub mod subscribe;

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use fnaa_client::{ConnectConfig, FnaaClient, Nameserver, PeerResolver};
use fnaa_core::Response;

use crate::config::AgentEntry;

/// The selected agent and how to find it.
#[derive(Debug, Clone)]
pub struct AgentTarget {
    pub agent: AgentEntry,
    pub nameserver: Nameserver,
    pub timeout_secs: u64,
}

impl AgentTarget {
    /// Discover the agent through DNS, connect and authenticate.
    pub async fn connect(&self) -> Result<FnaaClient> {
        let resolver = PeerResolver::hickory(Duration::from_secs(self.timeout_secs.max(1)));
        let endpoint = resolver
            .resolve(&self.agent.fqdn, &self.nameserver)
            .await
            .with_context(|| format!("could not locate agent {}", self.agent.fqdn))?;
        debug!(agent = %self.agent.name, endpoint = %endpoint, "agent located");

        FnaaClient::connect_endpoint(
            &endpoint,
            ConnectConfig {
                username: Some(self.agent.username.clone()),
                password: Some(self.agent.password.clone()),
                timeout_secs: self.timeout_secs,
            },
        )
        .await
        .with_context(|| format!("could not log in to agent {} at {endpoint}", self.agent.fqdn))
    }
}

/// Send `command`, say QUIT, and return the successful reply.
pub async fn exchange(mut client: FnaaClient, command: &str) -> Result<Response> {
    let response = client
        .send_command(command)
        .await
        .with_context(|| format!("`{command}` failed"))?;
    if let Err(e) = client.quit().await {
        warn!(error = %e, "QUIT failed");
    }
    response
        .into_result()
        .with_context(|| format!("agent refused `{command}`"))
}
