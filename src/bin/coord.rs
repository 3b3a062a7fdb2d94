//! Coordinator binary

use clap::{Parser, Subcommand};
use ringkv::common::{Config, NodeSpec};
use ringkv::coordinator::{bootstrap, CoordinatorServer};
use serde_json::json;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "ringkv-coord", version = ringkv::VERSION)]
#[command(about = "ringkv coordinator: replicated key-value store on a consistent-hash ring")]
struct Cli {
    /// Configuration file (TOML); missing file means defaults
    #[arg(long, global = true, default_value = ringkv::common::config::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Replication factor
    #[arg(long, global = true)]
    replicas: Option<usize>,

    /// Virtual nodes per unit
    #[arg(long, global = true)]
    virtual_nodes: Option<usize>,

    /// Per-outcome write timeout, e.g. 500ms or 5s
    #[arg(long, global = true, value_parser = ringkv::common::parse_duration)]
    write_timeout: Option<Duration>,

    /// Initial unit as id@host:port (repeatable)
    #[arg(long = "node", global = true, value_parser = parse_node_spec)]
    nodes: Vec<NodeSpec>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the coordinator HTTP server
    Serve {
        /// Bind address for HTTP
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Run an in-process load and print the resulting status as JSON
    Simulate {
        /// Keys to write
        #[arg(long, default_value = "1000")]
        keys: usize,

        /// Concurrent writers
        #[arg(long, default_value = "8")]
        writers: usize,

        /// Units to start with when none are configured
        #[arg(long, default_value = "3")]
        units: usize,

        /// Add one more unit after the load and wait for its migration
        #[arg(long)]
        grow: bool,
    },
}

fn parse_node_spec(s: &str) -> Result<NodeSpec, String> {
    let (id, address) = s
        .split_once('@')
        .ok_or_else(|| format!("expected id@host:port, got '{}'", s))?;
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| format!("expected host:port, got '{}'", address))?;
    let port = port
        .parse()
        .map_err(|e| format!("invalid port '{}': {}", port, e))?;
    Ok(NodeSpec {
        id: id.to_string(),
        host: host.to_string(),
        port,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // File and environment first, CLI flags on top
    let mut config = Config::from_file(&cli.config)?;
    if let Some(replicas) = cli.replicas {
        config.coordinator.replication_factor = replicas;
    }
    if let Some(virtual_nodes) = cli.virtual_nodes {
        config.coordinator.virtual_nodes = virtual_nodes;
    }
    if let Some(timeout) = cli.write_timeout {
        config.coordinator.write_timeout_ms = timeout.as_millis() as u64;
    }
    if !cli.nodes.is_empty() {
        config.initial_nodes = cli.nodes;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
    tracing::debug!("Loaded configuration from {}", cli.config.display());

    match cli.command {
        Commands::Serve { bind } => {
            if let Some(bind) = bind {
                config.coordinator.bind_addr = bind;
            }
            config.validate()?;
            CoordinatorServer::new(config).serve().await?;
        }
        Commands::Simulate {
            keys,
            writers,
            units,
            grow,
        } => {
            if config.initial_nodes.is_empty() {
                config.initial_nodes = (1..=units)
                    .map(|i| NodeSpec {
                        id: format!("node{}", i),
                        host: "localhost".to_string(),
                        port: 8080 + i as u16,
                    })
                    .collect();
            }
            config.validate()?;
            simulate(&config, keys, writers.max(1), grow).await?;
        }
    }

    Ok(())
}

async fn simulate(config: &Config, keys: usize, writers: usize, grow: bool) -> anyhow::Result<()> {
    let coordinator = bootstrap(config);
    coordinator.wait_for_rebalance().await;

    let mut handles = Vec::with_capacity(writers);
    for writer in 0..writers {
        let coordinator = Arc::clone(&coordinator);
        handles.push(tokio::spawn(async move {
            let mut failed = 0usize;
            for i in (writer..keys).step_by(writers) {
                if let Err(e) = coordinator
                    .put(&format!("key{}", i), &format!("value{}", i))
                    .await
                {
                    tracing::warn!("Write of key{} failed: {}", i, e);
                    failed += 1;
                }
            }
            failed
        }));
    }

    let mut failed = 0;
    for handle in handles {
        failed += handle.await?;
    }
    coordinator.wait_idle().await;
    tracing::info!("Wrote {} keys ({} failed)", keys, failed);

    if grow {
        let id = format!("node{}", coordinator.all_units().len() + 1);
        coordinator.add_node(&id, "localhost", 9000);
        coordinator.wait_for_rebalance().await;
    }

    let report = json!({
        "failed_writes": failed,
        "primary_ownership": coordinator.ring().key_distribution(10_000),
        "status": coordinator.status(),
        "metrics": coordinator.metrics().snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);

    coordinator
        .shutdown(config.coordinator.shutdown_grace())
        .await;
    Ok(())
}
