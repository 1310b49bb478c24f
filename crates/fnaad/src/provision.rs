//! Provisioning collaborators: broker topics, flow processors, DNS records.
//!
//! The agent only decides *what* to provision; how a topic is created or a
//! zone updated lives behind [`Provisioner`].

use async_trait::async_trait;
use tracing::{info, warn};

use fnaa_core::FnaaResult;

use crate::config::BrokerSection;

/// Side-effecting operations the agent triggers when flows come to life.
///
/// Implementations report failures as [`fnaa_core::FnaaError::Provisioning`].
#[async_trait]
pub trait Provisioner: Send + Sync {
    async fn create_broker_topic(&self, broker: &BrokerSection, topic: &str) -> FnaaResult<()>;

    async fn delete_broker_topic(&self, broker: &BrokerSection, topic: &str) -> FnaaResult<()>;

    /// Start a processor copying records from flow `src` into flow `dst`.
    async fn create_flow_processor(&self, src: &str, dst: &str) -> FnaaResult<()>;

    async fn create_dns_records(&self, flow: &str) -> FnaaResult<()>;
}

/// Provisioner that only records what it would do in the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingProvisioner;

#[async_trait]
impl Provisioner for LoggingProvisioner {
    async fn create_broker_topic(&self, broker: &BrokerSection, topic: &str) -> FnaaResult<()> {
        info!(topic, broker = %broker.name, kind = %broker.kind, "creating broker topic");
        Ok(())
    }

    async fn delete_broker_topic(&self, broker: &BrokerSection, topic: &str) -> FnaaResult<()> {
        info!(topic, broker = %broker.name, "deleting broker topic");
        Ok(())
    }

    async fn create_flow_processor(&self, src: &str, dst: &str) -> FnaaResult<()> {
        info!(src, dst, "creating flow processor");
        Ok(())
    }

    async fn create_dns_records(&self, flow: &str) -> FnaaResult<()> {
        info!(flow, "adding DNS records");
        Ok(())
    }
}

/// Create a flow: its broker topic, then its DNS records.
///
/// If the DNS step fails the topic is deleted again (best effort) so a
/// failed CREATE leaves nothing behind.
pub async fn provision_flow(
    provisioner: &dyn Provisioner,
    broker: &BrokerSection,
    topic: &str,
    flow: &str,
) -> FnaaResult<()> {
    provisioner.create_broker_topic(broker, topic).await?;
    if let Err(e) = provisioner.create_dns_records(flow).await {
        rollback_topic(provisioner, broker, topic).await;
        return Err(e);
    }
    info!(flow, "flow enabled");
    Ok(())
}

/// Create a subscription flow `dst` fed from `src`: topic, processor, DNS.
pub async fn provision_subscription(
    provisioner: &dyn Provisioner,
    broker: &BrokerSection,
    topic: &str,
    src: &str,
    dst: &str,
) -> FnaaResult<()> {
    provisioner.create_broker_topic(broker, topic).await?;
    let rest = async {
        provisioner.create_flow_processor(src, dst).await?;
        provisioner.create_dns_records(dst).await
    };
    if let Err(e) = rest.await {
        rollback_topic(provisioner, broker, topic).await;
        return Err(e);
    }
    info!(flow = dst, "flow enabled");
    Ok(())
}

async fn rollback_topic(provisioner: &dyn Provisioner, broker: &BrokerSection, topic: &str) {
    if let Err(e) = provisioner.delete_broker_topic(broker, topic).await {
        warn!(topic, error = %e, "rollback of broker topic failed");
    }
}
