//! Command dispatch.
//!
//! The keyword → handler table is assembled once through
//! [`DispatcherBuilder`] before the listener starts. The built
//! [`Dispatcher`] has no way to register more handlers, so every
//! connection task shares it read-only without locking.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use fnaa_client::RelayClient;
use fnaa_core::{BoxedStream, Command, CredentialVerifier, FnaaResult, ProtocolSession, Reply};

use crate::config::AgentConfig;
use crate::provision::Provisioner;

/// One inbound connection.
pub type Session = ProtocolSession<BoxedStream>;

/// Read-only state every handler may consult.
pub struct AgentContext {
    pub config: AgentConfig,
    pub verifier: Arc<dyn CredentialVerifier>,
    pub provisioner: Arc<dyn Provisioner>,
    pub relay: RelayClient,
}

/// What the connection loop does after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Close,
}

/// Handles one command keyword.
///
/// Handlers write their own replies. A reply-worthy error returned from
/// `handle` is turned into a single `404` line by the dispatcher.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(
        &self,
        ctx: &AgentContext,
        session: &mut Session,
        command: &Command,
    ) -> FnaaResult<Flow>;

    /// Whether the session must be authenticated first (when the agent
    /// enforces authentication at all).
    fn requires_auth(&self) -> bool {
        true
    }
}

/// Collects handlers before the listener starts.
#[derive(Default)]
pub struct DispatcherBuilder {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl DispatcherBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `keyword` (case-insensitive) to `handler`. A later binding for
    /// the same keyword replaces the earlier one.
    pub fn register(mut self, keyword: &str, handler: Arc<dyn CommandHandler>) -> Self {
        self.handlers.insert(keyword.to_ascii_lowercase(), handler);
        self
    }

    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
        }
    }
}

/// Immutable keyword → handler table.
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl Dispatcher {
    /// Process one line from the session.
    ///
    /// `Err` is only returned for failures of the session stream itself;
    /// everything else has been answered on the wire.
    pub async fn dispatch(
        &self,
        ctx: &AgentContext,
        session: &mut Session,
        line: &str,
    ) -> FnaaResult<Flow> {
        let Some(command) = Command::parse(line) else {
            session.send_reply(&Reply::fail("Unknown command")).await?;
            return Ok(Flow::Continue);
        };

        let Some(handler) = self.handlers.get(&command.keyword) else {
            debug!(command = %command.keyword, "unknown command");
            session.send_reply(&Reply::fail("Unknown command")).await?;
            return Ok(Flow::Continue);
        };

        if ctx.config.auth_required && handler.requires_auth() && !session.is_authenticated() {
            debug!(command = %command.keyword, "rejected before authentication");
            session
                .send_reply(&Reply::fail("Authentication required"))
                .await?;
            return Ok(Flow::Continue);
        }

        debug!(command = %command.keyword, args = ?command.args, "dispatching");
        match handler.handle(ctx, session, &command).await {
            Ok(flow) => Ok(flow),
            Err(e) if e.is_reply_worthy() => {
                warn!(command = %command.keyword, error = %e, "command failed");
                session.send_reply(&Reply::fail(e.reply_message())).await?;
                Ok(Flow::Continue)
            }
            Err(e) => Err(e),
        }
    }
}
