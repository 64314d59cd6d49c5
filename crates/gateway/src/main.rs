//! zeus-gateway — control plane for a fleet of AI-assistant workers.
//!
//! Clients hold one WebSocket at `/ws`; the adjacent HTTP surface serves
//! health, status, config, logs, and workspace artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use zeus_core::Config;
use zeus_gateway::launcher::ProcessLauncher;
use zeus_gateway::{gateway, Gateway};

/// Gateway for spawning, routing to, and observing AI-assistant workers.
#[derive(Parser, Debug)]
#[command(name = "zeus-gateway", version, about)]
struct Cli {
    /// Bind host (overrides ZEUS_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides ZEUS_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Workspace directory (overrides ZEUS_WORKSPACE).
    #[arg(long)]
    workspace: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    zeus_core::config::load_dotenv();
    let cli = Cli::parse();

    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.server.host = host;
    }
    if let Some(port) = cli.port {
        config.server.port = port;
    }
    if let Some(workspace) = cli.workspace {
        // The prompts and runtime dirs track the workspace unless pinned
        // explicitly in the environment.
        if std::env::var("ZEUS_PROMPTS_DIR").is_err() {
            config.storage.prompts_dir = workspace.join("prompts");
        }
        if std::env::var("ZEUS_RUNTIME_DIR").is_err() {
            config.storage.runtime_dir = workspace.join("run");
        }
        config.storage.workspace_dir = workspace;
    }
    config.log_summary();

    std::fs::create_dir_all(&config.storage.workspace_dir)?;
    let launcher = Arc::new(ProcessLauncher::new(config.storage.runtime_dir.clone())?);
    let gw = Gateway::new(config, launcher);
    gateway::run(gw).await
}
