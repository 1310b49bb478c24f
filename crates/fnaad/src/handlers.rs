//! Handlers for the agent's command keywords.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use fnaa_core::{Command, FnaaError, FnaaResult, Reply};

use crate::dispatch::{AgentContext, CommandHandler, Dispatcher, DispatcherBuilder, Flow, Session};
use crate::provision::provision_flow;
use crate::router;

/// The dispatcher with every keyword the agent answers.
pub fn dispatcher() -> Dispatcher {
    let describe: Arc<dyn CommandHandler> = Arc::new(DescribeHandler);
    DispatcherBuilder::new()
        .register("quit", Arc::new(QuitHandler))
        .register("authenticate", Arc::new(AuthenticateHandler))
        .register("create", Arc::new(CreateHandler))
        .register("get", Arc::new(GetHandler))
        .register("describe", describe.clone())
        .register("desc", describe)
        .register("subscribe", Arc::new(SubscribeHandler))
        .build()
}

/// Only `FLOW` objects exist.
fn require_flow_kind(command: &Command) -> FnaaResult<()> {
    let kind = command.require_arg(0, "object kind")?;
    if kind.eq_ignore_ascii_case("flow") {
        Ok(())
    } else {
        Err(FnaaError::Protocol(format!("Unsupported object kind {kind}")))
    }
}

// ── QUIT ───────────────────────────────────────────────────────────────

pub struct QuitHandler;

#[async_trait]
impl CommandHandler for QuitHandler {
    async fn handle(
        &self,
        _ctx: &AgentContext,
        session: &mut Session,
        _command: &Command,
    ) -> FnaaResult<Flow> {
        session.send_reply(&Reply::ok("Bye")).await?;
        Ok(Flow::Close)
    }

    fn requires_auth(&self) -> bool {
        false
    }
}

// ── AUTHENTICATE ───────────────────────────────────────────────────────

pub struct AuthenticateHandler;

#[async_trait]
impl CommandHandler for AuthenticateHandler {
    async fn handle(
        &self,
        ctx: &AgentContext,
        session: &mut Session,
        command: &Command,
    ) -> FnaaResult<Flow> {
        let mechanism = command.require_arg(0, "mechanism")?;
        session
            .accept_authentication(mechanism, ctx.verifier.as_ref())
            .await?;
        Ok(Flow::Continue)
    }

    fn requires_auth(&self) -> bool {
        false
    }
}

// ── CREATE FLOW ────────────────────────────────────────────────────────

pub struct CreateHandler;

#[async_trait]
impl CommandHandler for CreateHandler {
    async fn handle(
        &self,
        ctx: &AgentContext,
        session: &mut Session,
        command: &Command,
    ) -> FnaaResult<Flow> {
        require_flow_kind(command)?;
        let flow = command.require_arg(1, "flow name")?;
        let Some(ns) = ctx.config.namespace_for(flow) else {
            session.send_reply(&Reply::fail("Unknown namespace")).await?;
            return Ok(Flow::Continue);
        };

        info!(flow, namespace = %ns.name, "creating flow");
        provision_flow(ctx.provisioner.as_ref(), &ns.broker, &ns.topic_for(flow), flow).await?;
        session.send_reply(&Reply::ok(format!("OK {flow}"))).await?;
        Ok(Flow::Continue)
    }
}

// ── GET ────────────────────────────────────────────────────────────────

pub struct GetHandler;

#[async_trait]
impl CommandHandler for GetHandler {
    async fn handle(
        &self,
        ctx: &AgentContext,
        session: &mut Session,
        command: &Command,
    ) -> FnaaResult<Flow> {
        let namespaces = &ctx.config.namespaces;
        let reply = match command.arg(0).map(str::to_ascii_lowercase).as_deref() {
            Some("ns" | "namespaces") => {
                Reply::data(namespaces.iter().map(|ns| format!("namespace={}", ns.name)))
            }
            Some("fl" | "flows") => Reply::data(namespaces.iter().flat_map(|ns| {
                ns.flows
                    .iter()
                    .map(move |flow| format!("flow={flow}.{}", ns.name))
            })),
            _ => Reply::fail("Resource unavailable"),
        };
        session.send_reply(&reply).await?;
        Ok(Flow::Continue)
    }

    fn requires_auth(&self) -> bool {
        false
    }
}

// ── DESCRIBE / DESC FLOW ───────────────────────────────────────────────

pub struct DescribeHandler;

#[async_trait]
impl CommandHandler for DescribeHandler {
    async fn handle(
        &self,
        ctx: &AgentContext,
        session: &mut Session,
        command: &Command,
    ) -> FnaaResult<Flow> {
        require_flow_kind(command)?;
        let flow = command.require_arg(1, "flow name")?;
        let reply = match ctx.config.namespace_for(flow) {
            Some(ns) => Reply::data([
                format!("flow={flow}"),
                format!("type={}", ns.broker.kind),
                format!("topic={}", ns.topic_for(flow)),
                format!("server={}", ns.broker.servers),
            ]),
            None => Reply::fail("Unknown namespace"),
        };
        session.send_reply(&reply).await?;
        Ok(Flow::Continue)
    }
}

// ── SUBSCRIBE ──────────────────────────────────────────────────────────

pub struct SubscribeHandler;

#[async_trait]
impl CommandHandler for SubscribeHandler {
    async fn handle(
        &self,
        ctx: &AgentContext,
        session: &mut Session,
        command: &Command,
    ) -> FnaaResult<Flow> {
        let flow = command.require_arg(0, "flow name")?;
        let target = match command.arg(1) {
            None => None,
            Some(word) if word.eq_ignore_ascii_case("local") => {
                Some(command.require_arg(2, "LOCAL target")?)
            }
            Some(word) => {
                return Err(FnaaError::Protocol(format!(
                    "Expected LOCAL <target>, got {word}"
                )))
            }
        };

        let reply = router::subscribe(ctx, flow, target).await?;
        session.send_reply(&reply).await?;
        Ok(Flow::Continue)
    }
}
