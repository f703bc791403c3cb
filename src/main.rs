//! island-node: keeps a federated learning node training through network partitions
//!
//! Polls the coordinating tier, switches to island mode when it disappears,
//! buffers updates locally and syncs them back on reconnect. State survives
//! restarts through a verified recovery record.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use island_node::api::create_router;
use island_node::state::recovery::{load_record, recovery_status};
use island_node::{Config, IslandNode, RecoveryOutcome};

#[derive(Parser)]
#[command(name = "island-node")]
#[command(about = "Offline-resilient state for federated learning nodes")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "island-node.toml")]
    config: String,

    /// Data directory
    #[arg(short, long, env = "ISLAND_DATA_DIR")]
    data_dir: Option<String>,

    /// Node ID (overrides config file)
    #[arg(long, env = "ISLAND_NODE_ID")]
    node_id: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the recovery record status and verify its snapshot, then exit
    Inspect,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("island_node=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if Path::new(&cli.config).exists() {
        Config::load(&cli.config)?
    } else {
        info!(path = %cli.config, "Config file not found, using defaults");
        Config::default()
    };

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node.id = node_id;
    }
    if let Some(data_dir) = cli.data_dir {
        config.node.data_dir = PathBuf::from(data_dir);
    }
    config.validate()?;

    if let Some(Command::Inspect) = cli.command {
        return inspect(&config).await;
    }

    info!(node_id = %config.node.id, data_dir = %config.node.data_dir.display(), "Starting island-node");

    let node = Arc::new(IslandNode::from_config(config.clone())?);
    match node.start().await? {
        RecoveryOutcome::ColdStart => info!("Fresh state"),
        RecoveryOutcome::Restored { mode, updates, dropped, .. } => {
            info!(mode = %mode, updates, dropped, "Resumed from recovery record")
        }
    }

    if config.api.enabled {
        let app = create_router(node.clone());
        let addr = SocketAddr::from(([0, 0, 0, 0], config.api.http_port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("API listening on http://{}", addr);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        shutdown_signal().await;
    }

    node.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown requested");
}

async fn inspect(config: &Config) -> anyhow::Result<()> {
    let path = config.recovery_path();
    let status = recovery_status(&path).await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    let Some(record) = load_record(&path).await? else {
        return Ok(());
    };

    println!("persisted at: {}", record.timestamp);
    println!("mode:         {}", record.mode);
    println!("updates:      {}", record.updates.len());
    match record.snapshot {
        None => println!("snapshot:     none"),
        Some(snapshot) => match snapshot.verify_digest() {
            Ok(()) => println!("snapshot:     round {} ({}) valid", snapshot.round, snapshot.hash),
            Err(fault) => println!("snapshot:     round {} INVALID: {}", snapshot.round, fault),
        },
    }
    Ok(())
}
