//! Core server: accepts connections and runs one session task per peer.
//!
//! Errors inside a session end that session only; the accept loop keeps
//! going.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use fnaa_client::{PeerResolver, RelayClient};
use fnaa_core::messages::greeting;
use fnaa_core::{BoxedStream, FnaaError, FnaaResult, LineFramer, Reply, Role};

use crate::auth::StaticVerifier;
use crate::config::AgentConfig;
use crate::dispatch::{AgentContext, Dispatcher, Flow, Session};
use crate::handlers;
use crate::provision::{LoggingProvisioner, Provisioner};

/// Per-query DNS deadline when no I/O timeout is configured.
const DNS_TIMEOUT: Duration = Duration::from_secs(5);

/// The agent instance.
pub struct AgentServer {
    ctx: Arc<AgentContext>,
    dispatcher: Arc<Dispatcher>,
}

impl AgentServer {
    /// Agent with real DNS, the static verifier and the logging provisioner.
    pub fn new(config: AgentConfig) -> Self {
        let resolver = PeerResolver::hickory(config.io_timeout.unwrap_or(DNS_TIMEOUT));
        Self::with_parts(config, resolver, Arc::new(LoggingProvisioner))
    }

    /// Agent with explicit discovery and provisioning collaborators.
    pub fn with_parts(
        config: AgentConfig,
        resolver: PeerResolver,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        let verifier = Arc::new(StaticVerifier::new(config.users.clone()));
        let relay = RelayClient::new(resolver, config.io_timeout);
        let ctx = AgentContext {
            config,
            verifier,
            provisioner,
            relay,
        };
        Self {
            ctx: Arc::new(ctx),
            dispatcher: Arc::new(handlers::dispatcher()),
        }
    }

    /// Bind the configured port on all interfaces.
    pub async fn bind(&self) -> FnaaResult<TcpListener> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.ctx.config.port));
        let listener = TcpListener::bind(addr).await?;
        info!(addr = %addr, agent = %self.ctx.config.agent_id, "listening");
        Ok(listener)
    }

    /// Accept connections until the listener fails.
    pub async fn run(self, listener: TcpListener) -> FnaaResult<()> {
        let server = Arc::new(self);
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    continue;
                }
            };
            debug!(remote = %peer, "connection accepted");

            let server = server.clone();
            tokio::spawn(async move {
                match server.serve(Box::new(stream), Some(peer)).await {
                    Ok(()) => debug!(remote = %peer, "connection closed"),
                    Err(FnaaError::Timeout) => info!(remote = %peer, "idle connection dropped"),
                    Err(e) => warn!(remote = %peer, error = %e, "connection ended with error"),
                }
            });
        }
    }

    /// Run one session to completion over any stream.
    pub async fn serve(&self, stream: BoxedStream, peer: Option<SocketAddr>) -> FnaaResult<()> {
        let framer = LineFramer::new(stream).with_timeout(self.ctx.config.idle_timeout);
        let mut session = Session::new(framer, Role::Responder);
        if let Some(peer) = peer {
            session = session.with_peer_addr(peer);
        }

        session
            .send_line(&greeting(&self.ctx.config.agent_id))
            .await?;

        loop {
            let line = match session.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(FnaaError::LineTooLong) => {
                    debug!(remote = ?peer, "oversized command line skipped");
                    session
                        .send_reply(&Reply::fail(FnaaError::LineTooLong.reply_message()))
                        .await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self.dispatcher.dispatch(&self.ctx, &mut session, &line).await? == Flow::Close {
                break;
            }
        }

        if let Err(e) = session.shutdown().await {
            debug!(error = %e, "shutdown");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provision::testing::RecordingProvisioner;
    use crate::test_support::{config, SAMPLE_CONFIG};
    use fnaa_client::{ConnectConfig, FnaaClient, StaticLookup};
    use fnaa_core::{Credentials, STATUS_FAIL, STATUS_OK};
    use std::net::Ipv4Addr;
    use tokio::io::{duplex, DuplexStream};

    fn server_with(text: &str, dns: Arc<StaticLookup>) -> (AgentServer, Arc<RecordingProvisioner>) {
        let provisioner = Arc::new(RecordingProvisioner::default());
        let server = AgentServer::with_parts(
            config(text),
            PeerResolver::new(dns),
            provisioner.clone(),
        );
        (server, provisioner)
    }

    /// Serve one in-memory connection and hand back a client for it.
    async fn connect(server: Arc<AgentServer>) -> FnaaClient {
        let (near, far): (DuplexStream, DuplexStream) = duplex(4096);
        tokio::spawn(async move {
            let _ = server.serve(Box::new(far), None).await;
        });
        FnaaClient::from_stream(Box::new(near), None).await.unwrap()
    }

    async fn authed(server: Arc<AgentServer>) -> FnaaClient {
        let mut client = connect(server).await;
        client
            .authenticate(&Credentials::new("test", "test"))
            .await
            .unwrap();
        client
    }

    /// Listen on loopback port 0 and run the accept loop.
    async fn spawn_listener(server: AgentServer) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(server.run(listener));
        addr
    }

    #[tokio::test]
    async fn greeting_names_agent() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let client = connect(Arc::new(server)).await;
        assert_eq!(client.agent_id(), "fnaa.unix.ar");
    }

    #[tokio::test]
    async fn get_namespaces_exact() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = connect(Arc::new(server)).await;

        let resp = client.send_command("GET ns").await.unwrap();
        assert_eq!(resp.status, STATUS_OK);
        assert_eq!(resp.data, vec!["namespace=flow.unix.ar"]);

        let resp = client.send_command("get NAMESPACES").await.unwrap();
        assert_eq!(resp.data, vec!["namespace=flow.unix.ar"]);
    }

    #[tokio::test]
    async fn get_flows() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = connect(Arc::new(server)).await;
        let resp = client.send_command("GET fl").await.unwrap();
        assert_eq!(resp.data, vec!["flow=time.flow.unix.ar"]);
    }

    #[tokio::test]
    async fn get_bogus_resource() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = connect(Arc::new(server)).await;
        let resp = client.send_command("GET bogus").await.unwrap();
        assert_eq!(resp.status, STATUS_FAIL);
        assert_eq!(resp.message, "Resource unavailable");
        assert!(resp.data.is_empty());
    }

    #[tokio::test]
    async fn unknown_command_keeps_connection() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = connect(Arc::new(server)).await;
        let resp = client.send_command("FROB x").await.unwrap();
        assert_eq!(resp.message, "Unknown command");
        let resp = client.send_command("GET ns").await.unwrap();
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn describe_flow() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = authed(Arc::new(server)).await;

        let resp = client
            .send_command("DESCRIBE FLOW x.flow.unix.ar")
            .await
            .unwrap();
        assert_eq!(
            resp.data,
            vec![
                "flow=x.flow.unix.ar",
                "type=kafka",
                "topic=x.flow.unix.ar",
                "server=kf1.unix.ar:9092"
            ]
        );

        let alias = client.send_command("DESC FLOW x.flow.unix.ar").await.unwrap();
        assert_eq!(alias.data, resp.data);

        let foreign = client.send_command("DESC FLOW x.flow.other.ar").await.unwrap();
        assert_eq!(foreign.message, "Unknown namespace");
    }

    #[tokio::test]
    async fn plain_test_test_accepted() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let client = authed(Arc::new(server)).await;
        assert!(client.is_authenticated());
    }

    #[tokio::test]
    async fn other_credentials_rejected() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let server = Arc::new(server);
        for (user, pass) in [("test", "nope"), ("root", "test"), ("", "")] {
            let mut client = connect(server.clone()).await;
            let err = client
                .authenticate(&Credentials::new(user, pass))
                .await
                .unwrap_err();
            assert!(matches!(err, FnaaError::AuthFailed(_)));
        }
    }

    #[tokio::test]
    async fn second_authenticate_refused() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = authed(Arc::new(server)).await;
        let resp = client.send_command("AUTHENTICATE PLAIN").await.unwrap();
        assert_eq!(resp.message, "Already authenticated");
    }

    #[tokio::test]
    async fn gated_commands_need_auth() {
        let (server, provisioner) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = connect(Arc::new(server)).await;
        for command in [
            "CREATE FLOW a.flow.unix.ar",
            "SUBSCRIBE time.flow.unix.ar",
            "DESCRIBE FLOW a.flow.unix.ar",
        ] {
            let resp = client.send_command(command).await.unwrap();
            assert_eq!(resp.message, "Authentication required", "{command}");
        }
        assert!(provisioner.calls().is_empty());
    }

    #[tokio::test]
    async fn gate_can_be_disabled() {
        let text = SAMPLE_CONFIG.replace("required = true", "required = false");
        let (server, _) = server_with(&text, Arc::new(StaticLookup::new()));
        let mut client = connect(Arc::new(server)).await;
        let resp = client
            .send_command("DESCRIBE FLOW a.flow.unix.ar")
            .await
            .unwrap();
        assert!(resp.is_success());
    }

    #[tokio::test]
    async fn create_flow() {
        let (server, provisioner) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = authed(Arc::new(server)).await;
        let resp = client
            .send_command("CREATE FLOW a.flow.unix.ar")
            .await
            .unwrap();
        assert_eq!(resp.status, STATUS_OK);
        assert_eq!(resp.message, "OK a.flow.unix.ar");
        assert_eq!(
            provisioner.calls(),
            vec!["create_topic a.flow.unix.ar", "create_dns a.flow.unix.ar"]
        );
    }

    #[tokio::test]
    async fn create_failure_replies_404_and_rolls_back() {
        let provisioner = Arc::new(RecordingProvisioner::failing("create_dns"));
        let server = AgentServer::with_parts(
            config(SAMPLE_CONFIG),
            PeerResolver::new(Arc::new(StaticLookup::new())),
            provisioner.clone(),
        );
        let mut client = authed(Arc::new(server)).await;
        let resp = client
            .send_command("CREATE FLOW a.flow.unix.ar")
            .await
            .unwrap();
        assert_eq!(resp.status, STATUS_FAIL);
        assert_eq!(provisioner.calls().last().unwrap(), "delete_topic a.flow.unix.ar");
    }

    #[tokio::test]
    async fn create_needs_flow_kind() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = authed(Arc::new(server)).await;
        let resp = client.send_command("CREATE TABLE x").await.unwrap();
        assert_eq!(resp.status, STATUS_FAIL);
        let resp = client.send_command("CREATE FLOW").await.unwrap();
        assert_eq!(resp.message, "Missing flow name");
    }

    #[tokio::test]
    async fn quit_after_auth_is_bye() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut client = authed(Arc::new(server)).await;
        client.send_command("GET ns").await.unwrap();
        let resp = client.send_command("QUIT").await.unwrap();
        assert_eq!(resp.status, STATUS_OK);
        assert_eq!(resp.message, "Bye");
        // The agent closed its side.
        assert!(client.send_command("GET ns").await.is_err());
    }

    #[tokio::test]
    async fn local_subscribe_touches_no_dns() {
        let dns = Arc::new(StaticLookup::new());
        let (server, provisioner) = server_with(SAMPLE_CONFIG, dns.clone());
        let mut client = authed(Arc::new(server)).await;

        let resp = client
            .send_command("SUBSCRIBE time.flow.unix.ar")
            .await
            .unwrap();
        assert_eq!(resp.data.len(), 1);
        assert!(resp.data[0].ends_with(".time.flow.unix.ar"));
        assert_eq!(dns.queries(), Vec::<String>::new());
        assert_eq!(provisioner.calls().len(), 3);
    }

    #[tokio::test]
    async fn remote_subscribe_relays_to_owner() {
        // Owning agent, serving flow.other.ar.
        let owner_text = SAMPLE_CONFIG
            .replace("fnaa.unix.ar", "fnaa.other.ar")
            .replace("flow.unix.ar", "flow.other.ar");
        let (owner, owner_provisioner) = server_with(&owner_text, Arc::new(StaticLookup::new()));
        let owner_addr = spawn_listener(owner).await;

        // Local agent, resolving the owner through DNS.
        let dns = Arc::new(
            StaticLookup::new()
                .with_srv("time.flow.other.ar", "fnaa.other.ar", owner_addr.port())
                .with_a("fnaa.other.ar", Ipv4Addr::LOCALHOST),
        );
        let (server, local_provisioner) = server_with(SAMPLE_CONFIG, dns.clone());
        let mut client = authed(Arc::new(server)).await;

        let resp = client
            .send_command("SUBSCRIBE time.flow.other.ar LOCAL mine.flow.unix.ar")
            .await
            .unwrap();
        assert_eq!(resp.status, STATUS_OK);
        assert_eq!(resp.data.len(), 1);
        let line = &resp.data[0];
        assert!(line.starts_with("mine.flow.unix.ar SUBSCRIBED TO "), "{line}");
        assert!(line.ends_with(".time.flow.other.ar"), "{line}");

        assert_eq!(
            dns.queries(),
            vec!["SRV time.flow.other.ar.", "A fnaa.other.ar."]
        );
        assert!(local_provisioner.calls().is_empty());
        assert_eq!(owner_provisioner.calls().len(), 3);
    }

    #[tokio::test]
    async fn remote_subscribe_without_target() {
        let dns = Arc::new(StaticLookup::new());
        let (server, _) = server_with(SAMPLE_CONFIG, dns.clone());
        let mut client = authed(Arc::new(server)).await;
        let resp = client
            .send_command("SUBSCRIBE time.flow.other.ar")
            .await
            .unwrap();
        assert_eq!(resp.message, "Missing LOCAL target");
        assert_eq!(dns.srv_queries(), 0);
    }

    #[tokio::test]
    async fn resolution_failure_keeps_listener_alive() {
        let dns = Arc::new(StaticLookup::new());
        let (server, _) = server_with(SAMPLE_CONFIG, dns.clone());
        let addr = spawn_listener(server).await;
        let login = ConnectConfig {
            username: Some("test".into()),
            password: Some("test".into()),
            timeout_secs: 5,
        };

        let mut first = FnaaClient::connect(&addr.to_string(), login.clone())
            .await
            .unwrap();
        let resp = first
            .send_command("SUBSCRIBE time.flow.nowhere.ar LOCAL mine.flow.unix.ar")
            .await
            .unwrap();
        assert_eq!(resp.status, STATUS_FAIL);
        assert!(resp.message.starts_with("Resolution failed"), "{}", resp.message);
        assert_eq!(dns.srv_queries(), 2);

        // Same connection still answers.
        assert!(first.send_command("GET ns").await.unwrap().is_success());

        // And the listener still accepts.
        let mut second = FnaaClient::connect(&addr.to_string(), login).await.unwrap();
        assert!(second.send_command("GET ns").await.unwrap().is_success());
        second.quit().await.unwrap();
    }

    #[tokio::test]
    async fn stalled_owner_replies_404_in_time() {
        // Accepts the relay connection and never greets.
        let owner = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let owner_port = owner.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_stream, _) = owner.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(30)).await;
        });

        let dns = Arc::new(
            StaticLookup::new()
                .with_srv("time.flow.other.ar", "fnaa.other.ar", owner_port)
                .with_a("fnaa.other.ar", Ipv4Addr::LOCALHOST),
        );
        let text = SAMPLE_CONFIG.replace("io_timeout_secs = 5", "io_timeout_secs = 1");
        let (server, _) = server_with(&text, dns);
        let mut client = authed(Arc::new(server)).await;

        let started = std::time::Instant::now();
        let resp = client
            .send_command("SUBSCRIBE time.flow.other.ar LOCAL mine.flow.unix.ar")
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(resp.status, STATUS_FAIL);
        assert!(resp.message.starts_with("Relay transport failed"), "{}", resp.message);

        // The inbound connection survives.
        assert!(client.send_command("GET ns").await.unwrap().is_success());
    }

    /// Serve one in-memory connection and hand back the raw line stream,
    /// greeting already consumed.
    async fn raw_session(server: Arc<AgentServer>) -> LineFramer<DuplexStream> {
        let (near, far) = duplex(4096);
        tokio::spawn(async move {
            let _ = server.serve(Box::new(far), None).await;
        });
        let mut wire = LineFramer::new(near);
        assert_eq!(wire.expect_line().await.unwrap(), "220 fnaa.unix.ar FNAA");
        wire
    }

    #[tokio::test]
    async fn oversized_command_line_gets_one_404() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut wire = raw_session(Arc::new(server)).await;

        wire.send_line(&"a".repeat(70 * 1024)).await.unwrap();
        wire.send_line("GET ns").await.unwrap();

        assert_eq!(wire.expect_line().await.unwrap(), "404 Line too long");
        assert_eq!(wire.expect_line().await.unwrap(), "220 DATA");
        assert_eq!(wire.expect_line().await.unwrap(), "namespace=flow.unix.ar");
        assert_eq!(wire.expect_line().await.unwrap(), "220 OK");
    }

    #[tokio::test]
    async fn oversized_plain_token_gets_one_404() {
        let (server, _) = server_with(SAMPLE_CONFIG, Arc::new(StaticLookup::new()));
        let mut wire = raw_session(Arc::new(server)).await;

        wire.send_line("AUTHENTICATE PLAIN").await.unwrap();
        assert_eq!(wire.expect_line().await.unwrap(), "220 OK");
        wire.send_line(&"a".repeat(70 * 1024)).await.unwrap();
        assert_eq!(wire.expect_line().await.unwrap(), "404 Line too long");

        // Still the same session, still unauthenticated, and able to retry.
        wire.send_line("DESCRIBE FLOW x.flow.unix.ar").await.unwrap();
        assert_eq!(wire.expect_line().await.unwrap(), "404 Authentication required");
        wire.send_line("AUTHENTICATE PLAIN").await.unwrap();
        assert_eq!(wire.expect_line().await.unwrap(), "220 OK");
        wire.send_line("AHRlc3QAdGVzdA==").await.unwrap();
        assert_eq!(wire.expect_line().await.unwrap(), "220 Authenticated");
    }

    #[tokio::test]
    async fn idle_connection_is_dropped() {
        let text = SAMPLE_CONFIG.replace("idle_timeout_secs = 300", "idle_timeout_secs = 1");
        let (server, _) = server_with(&text, Arc::new(StaticLookup::new()));
        let (near, far) = duplex(1024);
        let result = server.serve(Box::new(far), None);
        let _keep = near;
        assert!(matches!(result.await, Err(FnaaError::Timeout)));
    }
}
