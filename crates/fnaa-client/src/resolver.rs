//! Peer discovery: namespace FQDN → reachable agent endpoint.
//!
//! Resolution is two-staged so an agent can move without its namespace
//! being renamed:
//!
//! 1. `SRV <namespace>.`, falling back to `SRV fnaa._flow._tcp.<namespace>.`
//!    when the first query yields no usable answer. The first usable answer
//!    names the agent host and port.
//! 2. `A <target>` turns the agent host into a numeric address.
//!
//! Nothing is cached: every call goes back to the nameserver.

use std::collections::HashMap;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fnaa_core::messages::SRV_FALLBACK_PREFIX;
use fnaa_core::{FnaaError, FnaaResult};
use hickory_resolver::config::{NameServerConfig, Protocol, ResolverConfig, ResolverOpts};
use hickory_resolver::TokioAsyncResolver;
use tracing::{debug, info, warn};

/// Port every nameserver is queried on.
pub const DNS_PORT: u16 = 53;

/// The nameserver to send discovery queries to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nameserver {
    /// An IP literal paired with port 53.
    Addr(SocketAddr),
    /// A hostname (made fully qualified) paired with port 53, looked up
    /// through the system resolver at query time.
    Host(String),
}

impl Nameserver {
    /// Parse a configured nameserver: IPv4, IPv6 (bracketed or not) or a
    /// hostname.
    pub fn parse(input: &str) -> FnaaResult<Self> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(FnaaError::Config("empty nameserver".into()));
        }
        let unbracketed = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed);

        match unbracketed.parse::<IpAddr>() {
            Ok(ip) => Ok(Nameserver::Addr(SocketAddr::new(ip, DNS_PORT))),
            Err(_) => Ok(Nameserver::Host(format!(
                "{}:{DNS_PORT}",
                fully_qualified(unbracketed)
            ))),
        }
    }

    /// The socket address to query, resolving a hostname within `timeout`.
    pub async fn socket_addr(&self, timeout: Duration) -> FnaaResult<SocketAddr> {
        let host_port = match self {
            Nameserver::Addr(addr) => return Ok(*addr),
            Nameserver::Host(host_port) => host_port,
        };
        let mut addrs = tokio::time::timeout(timeout, tokio::net::lookup_host(host_port.as_str()))
            .await
            .map_err(|_| FnaaError::ResolutionFailed(format!("nameserver {host_port}: timed out")))?
            .map_err(|e| FnaaError::ResolutionFailed(format!("nameserver {host_port}: {e}")))?;
        addrs.next().ok_or_else(|| {
            FnaaError::ResolutionFailed(format!("nameserver {host_port} has no address"))
        })
    }
}

impl fmt::Display for Nameserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Nameserver::Addr(addr) => write!(f, "{addr}"),
            Nameserver::Host(host_port) => f.write_str(host_port),
        }
    }
}

/// Append the root label if missing.
pub fn fully_qualified(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// One SRV answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SrvTarget {
    pub target: String,
    pub port: u16,
}

impl SrvTarget {
    /// A target of `.` or port 0 means "service not available here".
    fn is_usable(&self) -> bool {
        !self.target.is_empty() && self.target != "." && self.port != 0
    }
}

/// Where a peer agent can be reached. Valid for one relay attempt only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEndpoint {
    /// Numeric address of the agent.
    pub host: String,
    pub port: u16,
}

impl PeerEndpoint {
    /// `host:port`, bracketing IPv6 literals.
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for PeerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.address())
    }
}

/// DNS queries the resolver needs.
///
/// An empty answer is `Ok(vec![])`; `Err` is reserved for transport or
/// server failures. [`PeerResolver`] treats both as "no answer".
#[async_trait]
pub trait DnsLookup: Send + Sync {
    async fn srv(&self, nameserver: &Nameserver, name: &str) -> FnaaResult<Vec<SrvTarget>>;

    async fn a(&self, nameserver: &Nameserver, name: &str) -> FnaaResult<Vec<Ipv4Addr>>;
}

// ── Hickory-backed lookup ──────────────────────────────────────────────

/// [`DnsLookup`] that sends real queries to the given nameserver.
pub struct HickoryLookup {
    timeout: Duration,
}

impl HickoryLookup {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn resolver_for(&self, nameserver: &Nameserver) -> FnaaResult<TokioAsyncResolver> {
        let addr = nameserver.socket_addr(self.timeout).await?;

        let mut config = ResolverConfig::new();
        config.add_name_server(NameServerConfig::new(addr, Protocol::Udp));
        config.add_name_server(NameServerConfig::new(addr, Protocol::Tcp));

        let mut opts = ResolverOpts::default();
        opts.timeout = self.timeout;
        opts.attempts = 1;
        opts.cache_size = 0;
        opts.recursion_desired = true;

        Ok(TokioAsyncResolver::tokio(config, opts))
    }
}

impl Default for HickoryLookup {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl DnsLookup for HickoryLookup {
    async fn srv(&self, nameserver: &Nameserver, name: &str) -> FnaaResult<Vec<SrvTarget>> {
        let resolver = self.resolver_for(nameserver).await?;
        debug!(name, nameserver = %nameserver, "query SRV");
        let lookup = resolver
            .srv_lookup(name)
            .await
            .map_err(|e| FnaaError::ResolutionFailed(format!("SRV {name}: {e}")))?;
        Ok(lookup
            .iter()
            .map(|srv| SrvTarget {
                target: srv.target().to_utf8(),
                port: srv.port(),
            })
            .collect())
    }

    async fn a(&self, nameserver: &Nameserver, name: &str) -> FnaaResult<Vec<Ipv4Addr>> {
        let resolver = self.resolver_for(nameserver).await?;
        debug!(name, nameserver = %nameserver, "query A");
        let lookup = resolver
            .ipv4_lookup(name)
            .await
            .map_err(|e| FnaaError::ResolutionFailed(format!("A {name}: {e}")))?;
        Ok(lookup.iter().map(|a| a.0).collect())
    }
}

// ── In-memory lookup ───────────────────────────────────────────────────

/// [`DnsLookup`] answering from fixed tables, counting every query.
///
/// Lets peers be pinned without a zone, and lets tests observe exactly
/// which queries resolution issued.
#[derive(Default)]
pub struct StaticLookup {
    srv: HashMap<String, Vec<SrvTarget>>,
    a: HashMap<String, Vec<Ipv4Addr>>,
    srv_queries: AtomicUsize,
    a_queries: AtomicUsize,
    log: Mutex<Vec<String>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_srv(mut self, name: &str, target: &str, port: u16) -> Self {
        self.srv
            .entry(fully_qualified(name))
            .or_default()
            .push(SrvTarget {
                target: fully_qualified(target),
                port,
            });
        self
    }

    pub fn with_a(mut self, name: &str, addr: Ipv4Addr) -> Self {
        self.a.entry(fully_qualified(name)).or_default().push(addr);
        self
    }

    pub fn srv_queries(&self) -> usize {
        self.srv_queries.load(Ordering::SeqCst)
    }

    pub fn a_queries(&self) -> usize {
        self.a_queries.load(Ordering::SeqCst)
    }

    /// Every query issued, as `"<TYPE> <name>"`, in order.
    pub fn queries(&self) -> Vec<String> {
        self.log.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, entry: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(entry);
        }
    }
}

#[async_trait]
impl DnsLookup for StaticLookup {
    async fn srv(&self, _nameserver: &Nameserver, name: &str) -> FnaaResult<Vec<SrvTarget>> {
        self.srv_queries.fetch_add(1, Ordering::SeqCst);
        self.record(format!("SRV {name}"));
        Ok(self.srv.get(name).cloned().unwrap_or_default())
    }

    async fn a(&self, _nameserver: &Nameserver, name: &str) -> FnaaResult<Vec<Ipv4Addr>> {
        self.a_queries.fetch_add(1, Ordering::SeqCst);
        self.record(format!("A {name}"));
        Ok(self.a.get(name).cloned().unwrap_or_default())
    }
}

// ── Resolver ───────────────────────────────────────────────────────────

/// Resolves namespace names to agent endpoints.
#[derive(Clone)]
pub struct PeerResolver {
    dns: Arc<dyn DnsLookup>,
}

impl PeerResolver {
    pub fn new(dns: Arc<dyn DnsLookup>) -> Self {
        Self { dns }
    }

    /// Resolver sending real queries with the given per-query timeout.
    pub fn hickory(timeout: Duration) -> Self {
        Self::new(Arc::new(HickoryLookup::new(timeout)))
    }

    /// Resolve `namespace` to the endpoint of the agent that owns it.
    pub async fn resolve(
        &self,
        namespace: &str,
        nameserver: &Nameserver,
    ) -> FnaaResult<PeerEndpoint> {
        let fqdn = fully_qualified(namespace);
        info!(namespace = %fqdn, nameserver = %nameserver, "resolving agent");

        let service = self.discover_service(&fqdn, nameserver).await?;
        debug!(target = %service.target, port = service.port, "agent SRV resolved");

        let addrs = match self.dns.a(nameserver, &service.target).await {
            Ok(addrs) => addrs,
            Err(e) => {
                warn!(target = %service.target, error = %e, "A query failed");
                Vec::new()
            }
        };
        let addr = addrs.first().ok_or_else(|| {
            FnaaError::ResolutionFailed(format!("no A record for {}", service.target))
        })?;

        let endpoint = PeerEndpoint {
            host: addr.to_string(),
            port: service.port,
        };
        info!(namespace = %fqdn, endpoint = %endpoint, "agent resolved");
        Ok(endpoint)
    }

    async fn discover_service(
        &self,
        fqdn: &str,
        nameserver: &Nameserver,
    ) -> FnaaResult<SrvTarget> {
        if let Some(found) = self.first_usable_srv(fqdn, nameserver).await {
            return Ok(found);
        }

        let fallback = format!("{SRV_FALLBACK_PREFIX}{fqdn}");
        debug!(name = %fallback, "no SRV answer, trying service name");
        self.first_usable_srv(&fallback, nameserver)
            .await
            .ok_or_else(|| FnaaError::ResolutionFailed(format!("no SRV record for {fqdn}")))
    }

    async fn first_usable_srv(&self, name: &str, nameserver: &Nameserver) -> Option<SrvTarget> {
        match self.dns.srv(nameserver, name).await {
            Ok(records) => records.into_iter().find(SrvTarget::is_usable),
            Err(e) => {
                warn!(name, error = %e, "SRV query failed");
                None
            }
        }
    }
}
