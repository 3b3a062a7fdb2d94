//! Coordinator server

use std::sync::Arc;
use tokio::sync::watch;

use crate::common::{Config, Result};
use crate::coordinator::http::{create_router, CoordState};
use crate::coordinator::Coordinator;
use crate::node::HealthMonitor;

pub struct CoordinatorServer {
    config: Config,
}

/// Build a coordinator and admit the configured initial nodes
pub fn bootstrap(config: &Config) -> Arc<Coordinator> {
    let coordinator = Arc::new(Coordinator::new(&config.coordinator));
    for node in &config.initial_nodes {
        coordinator.add_node(&node.id, &node.host, node.port);
    }
    coordinator
}

impl CoordinatorServer {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub async fn serve(self) -> Result<()> {
        let settings = &self.config.coordinator;
        tracing::info!("Starting coordinator");
        tracing::info!("  HTTP API: {}", settings.bind_addr);
        tracing::info!("  Replication factor: {}", settings.replication_factor);
        tracing::info!("  Virtual nodes: {}", settings.virtual_nodes);
        tracing::info!("  Initial nodes: {}", self.config.initial_nodes.len());

        let coordinator = bootstrap(&self.config);

        let monitor = Arc::new(HealthMonitor::new(
            coordinator.ring().clone(),
            settings.health_check_interval(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let monitor_handle = monitor.clone().start(shutdown_rx);

        let router = create_router(CoordState::new(coordinator.clone()).with_health(monitor));
        let listener = tokio::net::TcpListener::bind(settings.bind_addr).await?;

        tracing::info!("✓ Coordinator ready on {}", settings.bind_addr);

        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await;
        if let Err(e) = &served {
            tracing::error!("HTTP server error: {}", e);
        }

        let _ = shutdown_tx.send(true);
        if let Err(e) = monitor_handle.await {
            tracing::error!("Health monitor task failed: {}", e);
        }

        let aborted = coordinator.shutdown(settings.shutdown_grace()).await;
        if aborted > 0 {
            tracing::warn!("{} background tasks did not finish in time", aborted);
        }
        tracing::info!("Coordinator stopped");

        served.map_err(Into::into)
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
