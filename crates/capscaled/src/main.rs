//! capscaled — the capscale daemon.
//!
//! Opens the object store, mirrors it into the informer cache and exposes the
//! cluster-api provider: node group discovery, node-to-group lookup and the
//! resize and delete operations.
//!
//! # Usage
//!
//! ```text
//! capscaled apply cluster.json
//! capscaled run --interval 10
//! capscaled groups
//! capscaled scale default/pool 2
//! capscaled delete-node default/pool default-pool-node-1
//! ```

mod config;
mod manifest;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, info};

use capscale_informer::{Informer, ObjectCache};
use capscale_provider::{ClusterApiProvider, MachineController, NodeGroup};
use capscale_state::{Node, StateStore};

use crate::config::CapscaleConfig;
use crate::manifest::Manifest;

#[derive(Parser)]
#[command(name = "capscaled", about = "capscale cluster-api node group provider")]
struct Cli {
    /// Path to capscale.toml. Defaults apply when it does not exist.
    #[arg(long, global = true, default_value = "capscale.toml")]
    config: PathBuf,

    /// Data directory for persistent state (overrides the config file).
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Follow the store and log discovered node groups until Ctrl-C.
    Run {
        /// Discovery interval in seconds (overrides the config file).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Print every discovered node group.
    Groups,

    /// Print the node group owning a node.
    GroupForNode {
        /// Node name.
        node: String,
    },

    /// Grow (positive delta) or shrink the target of (negative delta) a node group.
    Scale {
        /// Node group id (`namespace/name`).
        group: String,

        #[arg(allow_hyphen_values = true)]
        delta: i32,
    },

    /// Mark nodes of a node group for deletion.
    DeleteNode {
        /// Node group id (`namespace/name`).
        group: String,

        /// Node names.
        #[arg(required = true)]
        nodes: Vec<String>,
    },

    /// Seed the store from a JSON manifest.
    Apply {
        manifest: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = CapscaleConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    if let Some(data_dir) = cli.data_dir {
        config.store.data_dir = data_dir;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.filter))?,
        )
        .init();

    let store = open_store(&config)?;

    match cli.command {
        Command::Run { interval } => {
            let interval = interval.unwrap_or(config.discovery.interval_secs);
            run(store, &config, Duration::from_secs(interval.max(1))).await
        }
        Command::Groups => {
            let provider = snapshot_provider(store, &config)?;
            for group in provider.node_groups()? {
                println!("{}", group.debug());
            }
            Ok(())
        }
        Command::GroupForNode { node } => {
            let provider = snapshot_provider(store, &config)?;
            let node = find_node(&provider, &node)?;
            match provider.node_group_for_node(&node)? {
                Some(group) => println!("{}", group.debug()),
                None => println!("node {} is not in any node group", node.metadata.name),
            }
            Ok(())
        }
        Command::Scale { group, delta } => {
            let provider = snapshot_provider(store, &config)?;
            let mut node_group = provider
                .node_group(&group)?
                .ok_or_else(|| anyhow!("no node group {group}"))?;
            match delta {
                d if d > 0 => node_group.increase_size(d)?,
                d if d < 0 => node_group.decrease_target_size(d)?,
                _ => bail!("delta must be non-zero"),
            }
            println!("{}", node_group.debug());
            Ok(())
        }
        Command::DeleteNode { group, nodes } => {
            let provider = snapshot_provider(store, &config)?;
            let mut node_group = provider
                .node_group(&group)?
                .ok_or_else(|| anyhow!("no node group {group}"))?;
            let nodes = nodes
                .iter()
                .map(|name| find_node(&provider, name))
                .collect::<anyhow::Result<Vec<Node>>>()?;
            node_group.delete_nodes(&nodes)?;
            println!("marked {} node(s) for deletion in {group}", nodes.len());
            Ok(())
        }
        Command::Apply { manifest } => {
            let count = Manifest::from_file(&manifest)
                .with_context(|| format!("reading {}", manifest.display()))?
                .apply(&store)?;
            println!("applied {count} object(s)");
            Ok(())
        }
    }
}

fn open_store(config: &CapscaleConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.store.data_dir)?;
    let db_path = config.db_path();
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");
    Ok(store)
}

/// Provider over a one-shot list of the store, for single commands.
fn snapshot_provider(store: StateStore, config: &CapscaleConfig) -> anyhow::Result<ClusterApiProvider> {
    let cache = ObjectCache::from_store(&store)?;
    Ok(build_provider(cache, store, config))
}

fn build_provider(cache: ObjectCache, store: StateStore, config: &CapscaleConfig) -> ClusterApiProvider {
    ClusterApiProvider::new(
        &config.provider.name,
        MachineController::new(cache, store),
        config.provider.resource_limits.clone(),
    )
}

fn find_node(provider: &ClusterApiProvider, name: &str) -> anyhow::Result<Node> {
    provider
        .controller()
        .find_node_by_node_name(name)
        .map(|node| (*node).clone())
        .ok_or_else(|| anyhow!("node {name} not found"))
}

async fn run(store: StateStore, config: &CapscaleConfig, interval: Duration) -> anyhow::Result<()> {
    info!(provider = %config.provider.name, "capscale daemon starting");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let informer = Informer::start(store.clone(), shutdown_rx.clone())?;
    let provider = build_provider(informer.cache(), store, config);

    let discovery = tokio::spawn(discovery_loop(provider, interval, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    let _ = discovery.await;
    informer.join().await;

    info!("capscale daemon stopped");
    Ok(())
}

async fn discovery_loop(
    provider: ClusterApiProvider,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_secs = interval.as_secs(), "discovery loop started");

    loop {
        match provider.node_groups() {
            Ok(groups) => info!(count = groups.len(), "node groups refreshed"),
            Err(e) => error!(error = %e, "node group discovery failed"),
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("discovery loop shutting down");
                break;
            }
        }
    }
}
