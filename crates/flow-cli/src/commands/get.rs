//! `flow get namespaces|flows`: list what an agent serves.

use anyhow::Result;
use clap::ValueEnum;

use fnaa_client::FnaaClient;

use super::exchange;

/// Resource kinds an agent can list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Resource {
    #[value(alias = "ns")]
    Namespaces,
    #[value(alias = "fl")]
    Flows,
}

impl Resource {
    fn keyword(self) -> &'static str {
        match self {
            Resource::Namespaces => "namespaces",
            Resource::Flows => "flows",
        }
    }
}

pub fn command(resource: Resource) -> String {
    format!("GET {}", resource.keyword())
}

/// List `resource`; one output line per item.
pub async fn run(client: FnaaClient, resource: Resource) -> Result<Vec<String>> {
    Ok(exchange(client, &command(resource)).await?.data)
}
