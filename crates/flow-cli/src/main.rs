//! flow: command-line client for FNAA flow agents.
//!
//! Discovers the configured agent through DNS, logs in with PLAIN and lists,
//! describes, creates or subscribes to flows.

mod commands;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;

use commands::get::Resource;
use commands::AgentTarget;
use fnaa_client::Nameserver;

/// flow: FNAA flow client
#[derive(Parser)]
#[command(name = "flow", version, about = "Client for FNAA flow agents")]
struct Cli {
    /// Agent to talk to (name from the config file)
    #[arg(short, long, global = true)]
    agent: Option<String>,

    /// Nameserver used to discover the agent
    #[arg(short, long, global = true)]
    nameserver: Option<String>,

    /// Config file path
    #[arg(long = "config", global = true)]
    config: Option<String>,

    /// Connect/read deadline in seconds
    #[arg(long, global = true, default_value_t = 10)]
    timeout: u64,

    /// Print the reply as a JSON array of lines
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List namespaces or flows served by the agent
    Get {
        #[arg(value_enum)]
        resource: Resource,
    },

    /// Describe an object
    #[command(alias = "desc")]
    Describe {
        #[command(subcommand)]
        object: Object,
    },

    /// Create an object
    Create {
        #[command(subcommand)]
        object: Object,
    },

    /// Subscribe to a flow, local or in a foreign namespace
    Subscribe {
        /// Fully qualified flow name
        flow: String,
    },
}

#[derive(Subcommand)]
enum Object {
    /// A flow
    Flow {
        /// Fully qualified flow name
        name: String,
    },
}

impl Command {
    /// The flow a command is about, if any.
    fn flow(&self) -> Option<&str> {
        match self {
            Command::Get { .. } => None,
            Command::Describe {
                object: Object::Flow { name },
            }
            | Command::Create {
                object: Object::Flow { name },
            } => Some(name.as_str()),
            Command::Subscribe { flow } => Some(flow.as_str()),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing.
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("flow=debug,fnaa_client=debug,fnaa_core=debug")
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("flow=warn,fnaa_client=warn")
            .with_target(false)
            .init();
    }

    if let Err(e) = run(cli).await {
        error!("{:#}", e);
        eprintln!("flow: {e:#}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Load config file.
    let config_path = cli.config.clone().map(PathBuf::from).unwrap_or_else(|| {
        let home = dirs::home_dir().unwrap_or_default();
        home.join(".flow").join("config.toml")
    });
    let cfg = config::Config::load(&config_path)?;

    // CLI overrides config, config overrides the system resolver.
    let nameserver = match cli.nameserver.clone().or_else(|| cfg.nameserver.clone()) {
        Some(ns) => ns,
        None => config::system_nameserver()?,
    };
    let nameserver = Nameserver::parse(&nameserver)
        .with_context(|| format!("invalid nameserver '{nameserver}'"))?;

    let agent = cfg
        .select_agent(cli.agent.as_deref(), cli.command.flow())?
        .clone();
    let target = AgentTarget {
        agent,
        nameserver,
        timeout_secs: cli.timeout,
    };

    let client = target.connect().await?;
    let output = match cli.command {
        Command::Get { resource } => commands::get::run(client, resource).await?,
        Command::Describe {
            object: Object::Flow { name },
        } => commands::describe::run(client, &name).await?,
        Command::Create {
            object: Object::Flow { name },
        } => vec![commands::create::run(client, &name).await?],
        Command::Subscribe { flow } => {
            commands::subscribe::run(client, &flow, &target.agent.prefix).await?
        }
    };

    print!("{}", render(&output, cli.json)?);
    Ok(())
}

/// Output lines as plain text or as a JSON array.
fn render(lines: &[String], json: bool) -> Result<String> {
    if json {
        let mut text = serde_json::to_string_pretty(lines).context("failed to encode output")?;
        text.push('\n');
        Ok(text)
    } else {
        Ok(lines.iter().map(|line| format!("{line}\n")).collect())
    }
}
