//! The FNAA client.
//!
//! `FnaaClient` owns one connection to an agent: it reads the greeting,
//! optionally authenticates with PLAIN, sends commands and closes with QUIT.

use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use fnaa_core::error::{FnaaError, FnaaResult};
use fnaa_core::messages::Response;
use fnaa_core::{BoxedStream, Credentials, LineFramer, ProtocolSession, Role};

use crate::resolver::PeerEndpoint;

/// Configuration for connecting to an agent.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Username for PLAIN authentication. No authentication when `None`.
    pub username: Option<String>,
    /// Password for PLAIN authentication.
    pub password: Option<String>,
    /// Deadline for connecting and for every read/write, in seconds (0 = none).
    pub timeout_secs: u64,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            timeout_secs: 10,
        }
    }
}

impl ConnectConfig {
    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_secs > 0).then(|| Duration::from_secs(self.timeout_secs))
    }

    fn credentials(&self) -> Option<Credentials> {
        self.username.as_ref().map(|user| {
            Credentials::new(user.clone(), self.password.clone().unwrap_or_default())
        })
    }
}

/// One open connection to an agent.
pub struct FnaaClient {
    session: ProtocolSession<BoxedStream>,
    agent_id: String,
}

impl FnaaClient {
    /// Connect to `addr` (`host:port`), read the greeting and, if the
    /// config carries a username, authenticate.
    pub async fn connect(addr: &str, config: ConnectConfig) -> FnaaResult<Self> {
        let timeout = config.timeout();
        let stream = Self::dial(addr, timeout).await?;
        let peer = stream.peer_addr().ok();

        let mut client = Self::from_stream(Box::new(stream), timeout).await?;
        if let Some(peer) = peer {
            client.session = client.session.with_peer_addr(peer);
        }

        if let Some(creds) = config.credentials() {
            client.authenticate(&creds).await?;
        }
        Ok(client)
    }

    /// Open the TCP connection to `addr` without reading anything.
    pub async fn dial(addr: &str, timeout: Option<Duration>) -> FnaaResult<TcpStream> {
        info!(addr, "connecting to agent");
        let connect = TcpStream::connect(addr);
        let stream = match timeout {
            Some(limit) => tokio::time::timeout(limit, connect)
                .await
                .map_err(|_| FnaaError::Timeout)??,
            None => connect.await?,
        };
        Ok(stream)
    }

    /// Connect to a resolved peer endpoint.
    pub async fn connect_endpoint(
        endpoint: &PeerEndpoint,
        config: ConnectConfig,
    ) -> FnaaResult<Self> {
        Self::connect(&endpoint.address(), config).await
    }

    /// Wrap an already-open stream and read the greeting.
    pub async fn from_stream(stream: BoxedStream, timeout: Option<Duration>) -> FnaaResult<Self> {
        let framer = LineFramer::new(stream).with_timeout(timeout);
        let mut session = ProtocolSession::new(framer, Role::Initiator);
        let greeting = session.read_greeting().await?;
        let agent_id = greeting
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        debug!(agent = %agent_id, "greeted");
        Ok(Self { session, agent_id })
    }

    /// The id the agent announced in its greeting.
    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    pub fn is_authenticated(&self) -> bool {
        self.session.is_authenticated()
    }

    /// Run `AUTHENTICATE PLAIN` with the given credentials.
    pub async fn authenticate(&mut self, creds: &Credentials) -> FnaaResult<()> {
        self.session.authenticate_plain(creds).await?;
        info!(agent = %self.agent_id, username = %creds.username, "authenticated");
        Ok(())
    }

    /// Send one command and read its reply. A `404` is a response, not an
    /// error; use [`Response::into_result`] to turn it into one.
    pub async fn send_command(&mut self, command: &str) -> FnaaResult<Response> {
        debug!(agent = %self.agent_id, command, "sending command");
        self.session.request(command).await
    }

    /// Say QUIT and close the connection.
    pub async fn quit(mut self) -> FnaaResult<()> {
        let response = self.session.request("QUIT").await?;
        if !response.is_success() {
            warn!(agent = %self.agent_id, message = %response.message, "QUIT refused");
        }
        if let Err(e) = self.session.shutdown().await {
            debug!(error = %e, "shutdown after QUIT");
        }
        Ok(())
    }
}
