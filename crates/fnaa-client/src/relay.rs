//! Cross-agent subscription relay.
//!
//! When a caller subscribes to a flow that belongs to someone else, the
//! local agent acts as a client of the owning agent: resolve, connect,
//! authenticate, `SUBSCRIBE <flow>`, read the DATA block, `QUIT`.

use std::time::Duration;

use tracing::{info, warn};

use fnaa_core::error::{FnaaError, FnaaResult};
use fnaa_core::Credentials;

use crate::client::FnaaClient;
use crate::resolver::{Nameserver, PeerEndpoint, PeerResolver};

/// What a successful relay produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Where the owning agent was found.
    pub endpoint: PeerEndpoint,
    /// Concatenated DATA payload of the remote reply.
    pub payload: String,
}

/// Relays subscriptions to the agent that owns a flow.
#[derive(Clone)]
pub struct RelayClient {
    resolver: PeerResolver,
    io_timeout: Option<Duration>,
}

impl RelayClient {
    pub fn new(resolver: PeerResolver, io_timeout: Option<Duration>) -> Self {
        Self {
            resolver,
            io_timeout,
        }
    }

    /// Subscribe to `flow` at its owning agent.
    ///
    /// Errors are typed for the caller: [`FnaaError::ResolutionFailed`] when
    /// the agent can't be found, [`FnaaError::TransportFailed`] when it can't
    /// be talked to, [`FnaaError::Rejected`] when it says no.
    pub async fn subscribe(
        &self,
        flow: &str,
        nameserver: &Nameserver,
        credentials: &Credentials,
    ) -> FnaaResult<RelayOutcome> {
        let endpoint = self.resolver.resolve(flow, nameserver).await?;
        let peer = endpoint.address();

        let stream = FnaaClient::dial(&peer, self.io_timeout)
            .await
            .map_err(|e| transport(&peer, "connect", e))?;
        let mut client = FnaaClient::from_stream(Box::new(stream), self.io_timeout)
            .await
            .map_err(|e| transport(&peer, "greeting", e))?;

        client
            .authenticate(credentials)
            .await
            .map_err(|e| transport(&peer, "authenticate", e))?;
        let response = client
            .send_command(&format!("SUBSCRIBE {flow}"))
            .await
            .map_err(|e| transport(&peer, "subscribe", e))?
            .into_result()?;

        // The payload is already in hand; a failed QUIT only costs a log line.
        if let Err(e) = client.quit().await {
            warn!(peer = %peer, error = %e, "QUIT after relay failed");
        }

        info!(flow, peer = %peer, "relayed subscription");
        Ok(RelayOutcome {
            endpoint,
            payload: response.payload(),
        })
    }
}

fn transport(peer: &str, step: &str, err: FnaaError) -> FnaaError {
    match err {
        FnaaError::Rejected(_) | FnaaError::TransportFailed(_) => err,
        other => FnaaError::TransportFailed(format!("{step} {peer}: {other}")),
    }
}
