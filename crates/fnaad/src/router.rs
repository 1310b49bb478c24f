//! Flow Router: decides whether a subscription is served here or relayed.

use rand::Rng;
use tracing::info;

use fnaa_core::{FnaaError, FnaaResult, Reply};

use crate::config::{AgentConfig, LocalNamespace};
use crate::dispatch::AgentContext;
use crate::provision::provision_subscription;

/// Where a flow lives.
#[derive(Debug)]
pub enum Route<'a> {
    Local(&'a LocalNamespace),
    Remote,
}

/// A flow is local when its name contains one of our namespace names.
pub fn route<'a>(config: &'a AgentConfig, flow: &str) -> Route<'a> {
    match config.namespace_for(flow) {
        Some(ns) => Route::Local(ns),
        None => Route::Remote,
    }
}

/// Fresh identifier for a subscription flow: `<8 hex>.<flow>`.
pub fn subscription_id(flow: &str) -> String {
    let tag: u32 = rand::thread_rng().gen();
    format!("{}.{flow}", hex::encode(tag.to_be_bytes()))
}

/// Serve `SUBSCRIBE <flow> [LOCAL <target>]`.
pub async fn subscribe(
    ctx: &AgentContext,
    flow: &str,
    local_target: Option<&str>,
) -> FnaaResult<Reply> {
    match route(&ctx.config, flow) {
        Route::Local(ns) => subscribe_local(ctx, ns, flow).await,
        Route::Remote => {
            let target = local_target
                .ok_or_else(|| FnaaError::Protocol("Missing LOCAL target".into()))?;
            subscribe_remote(ctx, flow, target).await
        }
    }
}

async fn subscribe_local(
    ctx: &AgentContext,
    ns: &LocalNamespace,
    flow: &str,
) -> FnaaResult<Reply> {
    let id = subscription_id(flow);
    info!(flow, subscription = %id, namespace = %ns.name, "local subscription");
    provision_subscription(
        ctx.provisioner.as_ref(),
        &ns.broker,
        &ns.topic_for(&id),
        flow,
        &id,
    )
    .await?;
    Ok(Reply::data([id]))
}

async fn subscribe_remote(ctx: &AgentContext, flow: &str, target: &str) -> FnaaResult<Reply> {
    let creds = ctx
        .config
        .peer_credentials(flow)
        .ok_or_else(|| FnaaError::Other(format!("No relay credentials for {flow}")))?;
    info!(flow, target, "relaying subscription");

    let outcome = ctx
        .relay
        .subscribe(flow, &ctx.config.nameserver, &creds)
        .await?;
    Ok(Reply::data([format!(
        "{target} SUBSCRIBED TO {}",
        outcome.payload
    )]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{context, SAMPLE_CONFIG};
    use fnaa_client::StaticLookup;
    use std::sync::Arc;

    #[test]
    fn subscription_ids() {
        let id = subscription_id("time.flow.unix.ar");
        let (tag, rest) = id.split_once('.').unwrap();
        assert_eq!(tag.len(), 8);
        assert!(tag.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest, "time.flow.unix.ar");
    }

    #[tokio::test]
    async fn local_route_provisions_without_dns() {
        let dns = Arc::new(StaticLookup::new());
        let (ctx, provisioner) = context(SAMPLE_CONFIG, dns.clone());

        let reply = subscribe(&ctx, "time.flow.unix.ar", None).await.unwrap();
        let Reply::Data(lines) = reply else {
            panic!("expected DATA reply")
        };
        assert_eq!(lines.len(), 1);
        assert!(lines[0].ends_with(".time.flow.unix.ar"));

        assert_eq!(dns.srv_queries() + dns.a_queries(), 0);
        let calls = provisioner.calls();
        assert_eq!(calls.len(), 3);
        assert!(calls[1].starts_with("create_processor time.flow.unix.ar->"));
    }

    #[tokio::test]
    async fn remote_route_needs_target() {
        let dns = Arc::new(StaticLookup::new());
        let (ctx, _) = context(SAMPLE_CONFIG, dns.clone());

        let err = subscribe(&ctx, "time.flow.other.ar", None).await.unwrap_err();
        assert_eq!(err.reply_message(), "Missing LOCAL target");
        assert_eq!(dns.srv_queries(), 0);
    }

    #[tokio::test]
    async fn remote_resolution_failure_is_error_not_exit() {
        let dns = Arc::new(StaticLookup::new());
        let (ctx, _) = context(SAMPLE_CONFIG, dns.clone());

        let err = subscribe(&ctx, "time.flow.other.ar", Some("mine.time"))
            .await
            .unwrap_err();
        assert!(matches!(err, FnaaError::ResolutionFailed(_)));
        assert!(err.is_reply_worthy());
        assert_eq!(dns.srv_queries(), 2);
        assert_eq!(dns.a_queries(), 0);
    }
}
