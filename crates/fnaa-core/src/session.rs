//! Symmetric protocol session.
//!
//! One [`ProtocolSession`] wraps one connection. The agent's listening side
//! plays the [`Role::Responder`] half of the PLAIN handshake; relay and CLI
//! connections play the [`Role::Initiator`] half. Both halves walk the same
//! [`AuthState`] machine:
//!
//! ```text
//! Start → MechanismOffered → ChallengeSent → Verified | Rejected
//! ```

use std::net::SocketAddr;

use tracing::{debug, info, warn};

use crate::auth::{CredentialVerifier, Credentials, Mechanism};
use crate::error::{FnaaError, FnaaResult};
use crate::framer::LineFramer;
use crate::messages::{
    message_of, status_of, Reply, Response, DATA_BEGIN, DATA_END, STATUS_FAIL, STATUS_OK,
};
use crate::transport::AsyncStream;

/// Which end of the connection this session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Opened the connection and sends commands.
    Initiator,
    /// Accepted the connection and answers commands.
    Responder,
}

/// Progress of the PLAIN exchange on this connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    Start,
    MechanismOffered,
    ChallengeSent,
    Verified,
    Rejected,
}

/// How a responder-side AUTHENTICATE ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthOutcome {
    Verified,
    Rejected,
    AlreadyAuthenticated,
}

/// A framed connection plus its authentication state.
pub struct ProtocolSession<S> {
    framer: LineFramer<S>,
    role: Role,
    state: AuthState,
    authenticated: bool,
    peer_addr: Option<SocketAddr>,
}

impl<S: AsyncStream> ProtocolSession<S> {
    pub fn new(framer: LineFramer<S>, role: Role) -> Self {
        Self {
            framer,
            role,
            state: AuthState::Start,
            authenticated: false,
            peer_addr: None,
        }
    }

    pub fn with_peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn auth_state(&self) -> AuthState {
        self.state
    }

    /// Once true, stays true for the lifetime of the connection.
    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    // ── Line I/O ───────────────────────────────────────────────────────

    pub async fn read_line(&mut self) -> FnaaResult<Option<String>> {
        self.framer.read_line().await
    }

    pub async fn send_line(&mut self, line: &str) -> FnaaResult<()> {
        self.framer.send_line(line).await
    }

    /// Write every line of a reply, then flush once.
    pub async fn send_reply(&mut self, reply: &Reply) -> FnaaResult<()> {
        for line in reply.to_lines() {
            self.framer.write_line(&line);
        }
        self.framer.flush().await
    }

    pub async fn shutdown(&mut self) -> FnaaResult<()> {
        self.framer.shutdown().await
    }

    // ── Responder half ─────────────────────────────────────────────────

    /// Run the server side of `AUTHENTICATE <mechanism>`.
    ///
    /// Writes every reply itself. Rejections are outcomes, not errors; only
    /// stream failures and an oversized token line come back as `Err`, the
    /// latter with nothing written so the caller can answer it.
    pub async fn accept_authentication(
        &mut self,
        mechanism: &str,
        verifier: &dyn CredentialVerifier,
    ) -> FnaaResult<AuthOutcome> {
        self.expect_role(Role::Responder)?;

        if self.authenticated {
            self.send_reply(&Reply::fail("Already authenticated")).await?;
            return Ok(AuthOutcome::AlreadyAuthenticated);
        }

        self.state = AuthState::Start;
        if let Err(e) = Mechanism::parse(mechanism) {
            debug!(mechanism, "unsupported auth mechanism");
            self.state = AuthState::Rejected;
            self.send_reply(&Reply::fail(e.reply_message())).await?;
            return Ok(AuthOutcome::Rejected);
        }

        self.send_reply(&Reply::ok("OK")).await?;
        self.state = AuthState::MechanismOffered;

        // PLAIN has an empty initial challenge, so nothing goes on the wire.
        self.state = AuthState::ChallengeSent;

        let token = match self.framer.read_line().await {
            Ok(Some(token)) => token,
            Ok(None) => return Err(FnaaError::ConnectionClosed),
            Err(e) => {
                self.state = AuthState::Rejected;
                return Err(e);
            }
        };

        let creds = match Credentials::decode_plain(&token) {
            Ok(c) => c,
            Err(e) => {
                debug!(error = %e, "undecodable PLAIN token");
                return self.reject().await;
            }
        };

        if !creds.identity.is_empty() && creds.identity != creds.username {
            warn!(
                identity = %creds.identity,
                username = %creds.username,
                "authorization identity not supported, ignoring"
            );
        }

        if !verifier.verify(&creds.identity, &creds.username, &creds.password) {
            info!(username = %creds.username, peer = ?self.peer_addr, "credentials rejected");
            return self.reject().await;
        }

        self.authenticated = true;
        self.state = AuthState::Verified;
        info!(username = %creds.username, peer = ?self.peer_addr, "authenticated");
        self.send_reply(&Reply::ok("Authenticated")).await?;
        Ok(AuthOutcome::Verified)
    }

    async fn reject(&mut self) -> FnaaResult<AuthOutcome> {
        self.state = AuthState::Rejected;
        self.send_reply(&Reply::fail("Authentication failed")).await?;
        Ok(AuthOutcome::Rejected)
    }

    // ── Initiator half ─────────────────────────────────────────────────

    /// Read and check the `220 <agent-id> FNAA` greeting.
    pub async fn read_greeting(&mut self) -> FnaaResult<String> {
        self.expect_role(Role::Initiator)?;
        let line = self.framer.expect_line().await?;
        match status_of(&line) {
            Some(STATUS_OK) => Ok(message_of(&line).to_string()),
            _ => Err(FnaaError::Protocol(format!("unexpected greeting: {line}"))),
        }
    }

    /// Run the client side of `AUTHENTICATE PLAIN`.
    ///
    /// Returns the agent's final reply line on success.
    pub async fn authenticate_plain(&mut self, creds: &Credentials) -> FnaaResult<String> {
        self.expect_role(Role::Initiator)?;

        self.state = AuthState::Start;
        self.send_line(&format!("AUTHENTICATE {}", Mechanism::Plain.as_str()))
            .await?;
        let offered = self.framer.expect_line().await?;
        if status_of(&offered) != Some(STATUS_OK) {
            self.state = AuthState::Rejected;
            return Err(FnaaError::UnsupportedMechanism(
                message_of(&offered).to_string(),
            ));
        }
        self.state = AuthState::MechanismOffered;

        self.send_line(&creds.encode_plain()).await?;
        self.state = AuthState::ChallengeSent;

        let verdict = self.framer.expect_line().await?;
        if verdict.contains("220") {
            self.authenticated = true;
            self.state = AuthState::Verified;
            debug!(username = %creds.username, "authenticated with peer");
            Ok(verdict)
        } else {
            self.state = AuthState::Rejected;
            Err(FnaaError::AuthFailed(message_of(&verdict).to_string()))
        }
    }

    /// Send one command line and read its complete reply.
    ///
    /// A `220 DATA` block is read until a line containing `220 OK`; every
    /// line in between is payload. A `404` comes back as a response with
    /// that status, not as an error.
    pub async fn request(&mut self, command: &str) -> FnaaResult<Response> {
        self.expect_role(Role::Initiator)?;
        self.send_line(command).await?;

        let first = self.framer.expect_line().await?;
        if first.contains(DATA_BEGIN) {
            let mut data = Vec::new();
            loop {
                let line = self.framer.read_line().await?.ok_or_else(|| {
                    FnaaError::Protocol("connection closed inside DATA block".into())
                })?;
                if line.contains(DATA_END) {
                    return Ok(Response {
                        status: STATUS_OK,
                        message: message_of(&line).to_string(),
                        data,
                    });
                }
                data.push(line);
            }
        }

        let status = status_of(&first)
            .ok_or_else(|| FnaaError::Protocol(format!("malformed reply: {first}")))?;
        if status != STATUS_OK && status != STATUS_FAIL {
            return Err(FnaaError::Protocol(format!("unknown status: {first}")));
        }
        Ok(Response {
            status,
            message: message_of(&first).to_string(),
            data: Vec::new(),
        })
    }

    fn expect_role(&self, role: Role) -> FnaaResult<()> {
        if self.role == role {
            Ok(())
        } else {
            Err(FnaaError::Other(format!(
                "operation requires {role:?} role, session is {:?}",
                self.role
            )))
        }
    }
}
