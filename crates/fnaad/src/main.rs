//! fnaad: flow namespace agent daemon.
//!
//! Accepts line-protocol connections, authenticates callers with PLAIN,
//! provisions flows in the namespaces it owns and relays subscriptions for
//! foreign namespaces to the agent that owns them.

mod auth;
mod config;
mod dispatch;
mod handlers;
mod provision;
mod router;
mod server;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use clap::Parser;
use config::{AgentConfig, Overrides};
use server::AgentServer;
use std::path::PathBuf;
use tracing::{error, info};

/// fnaad: flow namespace agent daemon
#[derive(Parser, Debug)]
#[command(name = "fnaad", version, about = "Flow namespace agent daemon")]
struct Cli {
    /// Listen port (overrides agent.port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Nameserver for peer discovery (overrides agent.nameserver)
    #[arg(short, long)]
    nameserver: Option<String>,

    /// Identity announced in the greeting (overrides agent.id)
    #[arg(long)]
    agent_id: Option<String>,

    /// Config file path
    #[arg(short, long, default_value = "/etc/fnaa/fnaad.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting fnaad");

    if let Err(e) = run(cli).await {
        error!("fnaad failed: {e:#}");
        std::process::exit(1);
    }

    info!("fnaad stopped");
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let overrides = Overrides {
        port: cli.port,
        nameserver: cli.nameserver,
        agent_id: cli.agent_id,
    };
    let config_path = PathBuf::from(&cli.config);
    let agent_config = AgentConfig::load(&config_path, overrides)
        .with_context(|| format!("failed to load config {}", config_path.display()))?;

    info!(
        agent = %agent_config.agent_id,
        port = agent_config.port,
        nameserver = %agent_config.nameserver,
        namespaces = agent_config.namespaces.len(),
        auth_required = agent_config.auth_required,
        "config loaded"
    );

    let agent = AgentServer::new(agent_config);
    let listener = agent.bind().await.context("failed to bind listener")?;

    tokio::select! {
        result = agent.run(listener) => result.context("server error")?,
        _ = shutdown_signal() => info!("received shutdown signal"),
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
