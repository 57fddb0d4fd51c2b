//! Node daemon for distributed GPU leasing.
//!
//! Wires a [`governor_lease::Governor`] to a UDP broadcast transport, a device
//! inventory file and an HTTP API for local job launchers.

use std::sync::Arc;

use anyhow::{Context, Result};
use governor_lease::{GossipDiscovery, Governor, Peer};
use tokio::net::TcpListener;
use tracing::info;

pub mod api;
pub mod cli;
pub mod config;
pub mod inventory;
pub mod udp;

pub use cli::{Cli, Commands};
pub use config::NodeConfig;

/// Runs a node until interrupted.
pub async fn run(config: NodeConfig) -> Result<()> {
    let id = config.peer_id();
    let host = config.host();

    let resources = inventory::load(config.inventory.as_deref()).list_resources(&host);
    info!(%id, %host, devices = resources.len(), "starting node");

    let bus = Arc::new(
        udp::UdpBus::bind(config.listen, config.peers.clone())
            .await
            .with_context(|| format!("binding udp {}", config.listen))?,
    );
    let receiver = bus.spawn_receiver();

    let discovery = GossipDiscovery::new(
        Peer {
            id: id.clone(),
            addr: host.clone(),
        },
        bus.clone(),
    );
    let discovery_task = discovery.start()?;

    let governor = Arc::new(Governor::new(
        id,
        host,
        resources,
        bus,
        discovery,
        config.lease_config(),
    )?);
    governor.start()?;

    let listener = TcpListener::bind(config.api)
        .await
        .with_context(|| format!("binding api {}", config.api))?;
    info!(api = %config.api, "api listening");
    info!("  GET  /status  - node status");
    info!("  POST /lease   - lease a GPU");
    info!("  POST /release - return a lease early");
    info!("  GET  /peers   - peers advertising capacity");

    axum::serve(listener, api::router(api::ApiState::new(governor.clone())))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutting down");
        })
        .await
        .context("api server")?;

    governor.shutdown();
    discovery_task.abort();
    receiver.abort();
    Ok(())
}
