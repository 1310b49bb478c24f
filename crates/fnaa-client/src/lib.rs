//! fnaa-client: Rust client library for FNAA flow agents.
//!
//! Finds the agent that owns a namespace through DNS (SRV, then A), talks
//! to it over the line protocol, and relays subscriptions on behalf of
//! another agent.
//!
//! # Quick Start
//!
//! ```no_run
//! use fnaa_client::{ConnectConfig, FnaaClient};
//!
//! # async fn example() -> fnaa_core::FnaaResult<()> {
//! let mut client = FnaaClient::connect("127.0.0.1:61000", ConnectConfig {
//!     username: Some("test".into()),
//!     password: Some("test".into()),
//!     ..Default::default()
//! }).await?;
//!
//! let namespaces = client.send_command("GET ns").await?.into_result()?;
//! for line in &namespaces.data {
//!     println!("{line}");
//! }
//!
//! client.quit().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod relay;
pub mod resolver;

pub use client::{ConnectConfig, FnaaClient};
pub use relay::{RelayClient, RelayOutcome};
pub use resolver::{
    DnsLookup, HickoryLookup, Nameserver, PeerEndpoint, PeerResolver, SrvTarget, StaticLookup,
};

// Re-export fnaa-core error types for convenience.
pub use fnaa_core::{FnaaError, FnaaResult};
