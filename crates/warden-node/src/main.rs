//! # Warden Node
//!
//! Pre-execution authority enforcement for automated agents: signed,
//! time-bound mandates gate irreversible actions, and every decision lands
//! in an append-only, Merkle-committed audit ledger.

use anyhow::Result;
use tracing::info;
use warden_node::{Node, NodeConfig};
use warden_telemetry::{init_telemetry, TelemetryConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let _guard = init_telemetry(&TelemetryConfig::from_env())?;

    let config = NodeConfig::from_env();
    info!(data_dir = ?config.data_dir, partitions = config.partitions, "Starting warden-node");

    let mut node = Node::build(config)?;
    node.start();

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    node.shutdown().await;
    Ok(())
}
