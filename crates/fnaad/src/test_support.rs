//! Shared fixtures for the agent's tests.

use std::sync::Arc;

use fnaa_client::{PeerResolver, RelayClient, StaticLookup};

use crate::auth::StaticVerifier;
use crate::config::{AgentConfig, Overrides};
use crate::dispatch::AgentContext;
use crate::provision::testing::RecordingProvisioner;

pub const SAMPLE_CONFIG: &str = r#"
[agent]
id = "fnaa.unix.ar"
port = 61000
nameserver = "127.0.0.1"
io_timeout_secs = 5
idle_timeout_secs = 300

[auth]
required = true
[[auth.users]]
username = "test"
password = "test"

[[brokers]]
name = "kafka_local"
type = "kafka"
servers = "kf1.unix.ar:9092"

[[namespaces]]
name = "flow.unix.ar"
broker = "kafka_local"
flows = ["time"]

[[peers]]
username = "test"
password = "test"
"#;

pub fn config(text: &str) -> AgentConfig {
    AgentConfig::from_toml(text, Overrides::default()).unwrap()
}

pub fn context(text: &str, dns: Arc<StaticLookup>) -> (AgentContext, Arc<RecordingProvisioner>) {
    let config = config(text);
    let provisioner = Arc::new(RecordingProvisioner::default());
    let ctx = AgentContext {
        verifier: Arc::new(StaticVerifier::new(config.users.clone())),
        provisioner: provisioner.clone(),
        relay: RelayClient::new(PeerResolver::new(dns), config.io_timeout),
        config,
    };
    (ctx, provisioner)
}
