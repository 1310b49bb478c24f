//! Client configuration at `~/.flow/config.toml`.
//!
//! Lists the agents this user can talk to. CLI flags always override config
//! file values.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::debug;

/// Where the system resolver configuration lives.
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Nameserver used to discover agents; falls back to the system resolver.
    #[serde(default)]
    pub nameserver: Option<String>,

    /// Known agents.
    #[serde(default)]
    pub agents: Vec<AgentEntry>,

    /// Which agent serves which namespace, used when `--agent` is omitted.
    #[serde(default)]
    pub namespaces: Vec<NamespaceEntry>,
}

/// `[[agents]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AgentEntry {
    /// Local nickname, selected with `--agent`.
    pub name: String,

    /// FQDN the agent is discovered under (SRV record owner).
    pub fqdn: String,

    pub username: String,

    pub password: String,

    /// Prefix for the local name of subscribed flows.
    #[serde(default)]
    pub prefix: String,
}

/// `[[namespaces]]` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NamespaceEntry {
    /// Namespace domain, e.g. `flow.unix.ar`.
    pub name: String,

    /// `name` of the `[[agents]]` entry that serves it.
    pub agent: String,
}

impl Config {
    /// Load configuration from a TOML file, returning defaults if the file
    /// does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), agents = config.agents.len(), "loaded config");
        Ok(config)
    }

    /// Pick the agent to talk to.
    ///
    /// An explicit `name` wins. Otherwise, for commands about a flow, the
    /// agent of the longest `[[namespaces]]` entry contained in the flow name
    /// is used; failing that, the only configured agent.
    pub fn select_agent(&self, name: Option<&str>, flow: Option<&str>) -> Result<&AgentEntry> {
        if let Some(name) = name {
            return self.agent_named(name);
        }

        let owner = flow.and_then(|flow| {
            self.namespaces
                .iter()
                .filter(|ns| !ns.name.is_empty() && flow.contains(ns.name.as_str()))
                .max_by_key(|ns| ns.name.len())
        });
        if let Some(ns) = owner {
            debug!(namespace = %ns.name, agent = %ns.agent, "agent discovered by namespace");
            return self.agent_named(&ns.agent).with_context(|| {
                format!("namespace '{}' is configured with an unknown agent", ns.name)
            });
        }

        match self.agents.as_slice() {
            [] => bail!("no agents configured, add one to the config file"),
            [only] => Ok(only),
            _ => bail!("more than one agent configured, select one with --agent"),
        }
    }

    fn agent_named(&self, name: &str) -> Result<&AgentEntry> {
        self.agents
            .iter()
            .find(|a| a.name == name)
            .with_context(|| format!("agent '{name}' is not in the config file"))
    }
}

/// First `nameserver` entry of a resolv.conf text.
pub fn parse_resolv_conf(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#') && !line.starts_with(';'))
        .find_map(|line| {
            let mut words = line.split_whitespace();
            (words.next() == Some("nameserver"))
                .then(|| words.next().map(str::to_string))
                .flatten()
        })
}

/// The system's first configured nameserver.
pub fn system_nameserver() -> Result<String> {
    let text = std::fs::read_to_string(RESOLV_CONF)
        .with_context(|| format!("failed to read {RESOLV_CONF}"))?;
    parse_resolv_conf(&text)
        .with_context(|| format!("no nameserver in {RESOLV_CONF}, use --nameserver"))
}
