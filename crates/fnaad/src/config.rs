//! Agent configuration: TOML file + CLI overrides.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use fnaa_client::Nameserver;
use fnaa_core::{Credentials, FnaaError, FnaaResult};

/// Top-level config file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub agent: AgentSection,
    #[serde(default)]
    pub auth: AuthSection,
    #[serde(default)]
    pub brokers: Vec<BrokerSection>,
    #[serde(default)]
    pub namespaces: Vec<NamespaceSection>,
    #[serde(default)]
    pub peers: Vec<PeerSection>,
}

/// `[agent]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentSection {
    #[serde(default = "default_agent_id")]
    pub id: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub nameserver: String,
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
            port: default_port(),
            nameserver: String::new(),
            io_timeout_secs: default_io_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

/// `[auth]` section of the config TOML.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthSection {
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub users: Vec<UserEntry>,
}

impl Default for AuthSection {
    fn default() -> Self {
        Self {
            required: true,
            users: Vec::new(),
        }
    }
}

/// `[[auth.users]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct UserEntry {
    pub username: String,
    pub password: String,
}

/// `[[brokers]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BrokerSection {
    pub name: String,
    #[serde(rename = "type", default = "default_broker_type")]
    pub kind: String,
    pub servers: String,
    #[serde(default)]
    pub topic_prefix: String,
    #[serde(default)]
    pub topic_suffix: String,
}

/// `[[namespaces]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct NamespaceSection {
    pub name: String,
    pub broker: String,
    #[serde(default)]
    pub flows: Vec<String>,
}

/// `[[peers]]` entry: credentials used when relaying to a foreign agent.
#[derive(Debug, Clone, Deserialize)]
pub struct PeerSection {
    #[serde(default)]
    pub namespace: Option<String>,
    pub username: String,
    pub password: String,
}

fn default_agent_id() -> String {
    "fnaa.localhost".to_string()
}
fn default_port() -> u16 {
    61000
}
fn default_io_timeout() -> u64 {
    30
}
fn default_idle_timeout() -> u64 {
    300
}
fn default_broker_type() -> String {
    "kafka".to_string()
}
fn default_true() -> bool {
    true
}

/// CLI values that take precedence over the file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub port: Option<u16>,
    pub nameserver: Option<String>,
    pub agent_id: Option<String>,
}

/// A namespace owned by this agent, with its broker resolved.
#[derive(Debug, Clone)]
pub struct LocalNamespace {
    pub name: String,
    pub broker: BrokerSection,
    pub flows: Vec<String>,
}

impl LocalNamespace {
    /// Broker topic backing `flow`.
    pub fn topic_for(&self, flow: &str) -> String {
        format!("{}{flow}{}", self.broker.topic_prefix, self.broker.topic_suffix)
    }
}

/// Resolved agent configuration (validated, CLI overrides applied).
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_id: String,
    pub port: u16,
    pub nameserver: Nameserver,
    pub io_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub auth_required: bool,
    pub users: Vec<UserEntry>,
    pub namespaces: Vec<LocalNamespace>,
    pub peers: Vec<PeerSection>,
}

impl AgentConfig {
    /// Load config from a TOML file, then apply CLI overrides.
    ///
    /// A missing file is an error: the agent cannot run without a nameserver.
    pub fn load(config_path: &Path, overrides: Overrides) -> FnaaResult<Self> {
        let expanded = expand_tilde(config_path);
        info!(path = %expanded.display(), "loading config file");
        let content = std::fs::read_to_string(&expanded).map_err(|e| {
            FnaaError::Config(format!("cannot read {}: {e}", expanded.display()))
        })?;
        Self::from_toml(&content, overrides)
    }

    /// Parse and validate config text.
    pub fn from_toml(content: &str, overrides: Overrides) -> FnaaResult<Self> {
        let file: ConfigFile = toml::from_str(content)
            .map_err(|e| FnaaError::Config(format!("config parse error: {e}")))?;
        Self::resolve(file, overrides)
    }

    fn resolve(file: ConfigFile, overrides: Overrides) -> FnaaResult<Self> {
        let port = overrides.port.unwrap_or(file.agent.port);
        if port == 0 {
            return Err(FnaaError::Config("agent.port must not be 0".into()));
        }

        let nameserver_str = overrides.nameserver.unwrap_or(file.agent.nameserver);
        if nameserver_str.trim().is_empty() {
            return Err(FnaaError::Config(
                "no nameserver configured (agent.nameserver or --nameserver)".into(),
            ));
        }
        let nameserver = Nameserver::parse(&nameserver_str)?;

        let mut namespaces = Vec::with_capacity(file.namespaces.len());
        for ns in file.namespaces {
            let broker = file
                .brokers
                .iter()
                .find(|b| b.name == ns.broker)
                .cloned()
                .ok_or_else(|| {
                    FnaaError::Config(format!(
                        "namespace {} references unknown broker {}",
                        ns.name, ns.broker
                    ))
                })?;
            namespaces.push(LocalNamespace {
                name: ns.name,
                broker,
                flows: ns.flows,
            });
        }

        Ok(Self {
            agent_id: overrides.agent_id.unwrap_or(file.agent.id),
            port,
            nameserver,
            io_timeout: secs(file.agent.io_timeout_secs),
            idle_timeout: secs(file.agent.idle_timeout_secs),
            auth_required: file.auth.required,
            users: file.auth.users,
            namespaces,
            peers: file.peers,
        })
    }

    /// The local namespace `flow` belongs to: the first one whose name the
    /// flow name contains.
    pub fn namespace_for(&self, flow: &str) -> Option<&LocalNamespace> {
        self.namespaces.iter().find(|ns| flow.contains(ns.name.as_str()))
    }

    /// Relay credentials for a foreign flow: the first peer entry whose
    /// namespace the flow name contains, else the first catch-all entry.
    pub fn peer_credentials(&self, flow: &str) -> Option<Credentials> {
        self.peers
            .iter()
            .find(|p| p.namespace.as_deref().is_some_and(|ns| flow.contains(ns)))
            .or_else(|| self.peers.iter().find(|p| p.namespace.is_none()))
            .map(|p| Credentials::new(p.username.clone(), p.password.clone()))
    }
}

fn secs(value: u64) -> Option<Duration> {
    (value > 0).then(|| Duration::from_secs(value))
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    path.to_path_buf()
}
