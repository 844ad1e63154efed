//! weft-daemon: the mesh node as an OS process.
//!
//! Composition root only: loads the TOML config, opens the database,
//! bootstraps the identity, wires the TCP transport into a
//! [`weft_mesh::MeshNode`], dials the configured bootstrap peers, and
//! runs until Ctrl-C.

mod config;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use weft_mesh::{MeshEvent, MeshNode};
use weft_transport::tcp::{TcpConfig, TcpTransport};
use weft_transport::Transport;
use weft_types::PeerId;

use crate::config::DaemonConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var("WEFT_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("./weft.toml"));
    let config = DaemonConfig::load(&config_path)?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    tracing_subscriber::EnvFilter::new(format!("weft={}", config.logging.level))
                }),
        )
        .init();

    info!("weft daemon starting");

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let db = weft_db::open(&data_dir.join("weft.db"))?;
    let identity =
        weft_mesh::identity::get_or_create_primary(&db, &config.identity.display_name)?;
    let local_peer = identity.peer_id;
    info!(peer = %local_peer, "local identity ready");

    let tcp = Arc::new(TcpTransport::new(
        local_peer,
        TcpConfig {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], config.network.listen_port)),
            connect_timeout: std::time::Duration::from_millis(
                config.mesh.connection_timeout_ms,
            ),
            ..TcpConfig::default()
        },
    ));

    let node = Arc::new(MeshNode::new(
        config.mesh.clone(),
        identity,
        db,
        vec![tcp.clone()],
    )?);
    let mut events = node.events();
    node.start().await?;

    if let Some(addr) = tcp.local_addr() {
        info!(%addr, "listening for mesh links");
    }

    for bootstrap in &config.network.bootstrap_peers {
        let peer: PeerId = match bootstrap.peer_id.parse() {
            Ok(peer) => peer,
            Err(e) => {
                warn!(peer = %bootstrap.peer_id, error = %e, "bad bootstrap peer id");
                continue;
            }
        };
        let blob = bootstrap.address.clone().into_bytes();
        if let Err(e) = tcp.connect(peer, Some(blob)).await {
            warn!(peer = %peer.short(), address = %bootstrap.address, error = %e, "bootstrap dial failed");
        }
    }

    // Surface engine events in the log until shutdown.
    let event_task = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(MeshEvent::MessageReceived { from, kind, payload, .. }) => {
                    info!(from = %from.short(), ?kind, bytes = payload.len(), "message received");
                }
                Ok(MeshEvent::PeerDiscovered { peer }) => {
                    info!(peer = %peer.short(), "peer discovered");
                }
                Ok(MeshEvent::PeerConnected { peer }) => {
                    info!(peer = %peer.short(), "peer connected");
                }
                Ok(MeshEvent::PeerDisconnected { peer }) => {
                    info!(peer = %peer.short(), "peer disconnected");
                }
                Ok(MeshEvent::MessageStatus { id, status }) => {
                    info!(id = %hex::encode(&id[..4]), ?status, "message status");
                }
                Ok(MeshEvent::QueueDropped { id }) => {
                    warn!(id = %hex::encode(&id[..4]), "queued message dropped");
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    node.stop().await;
    event_task.abort();

    info!("weft daemon stopped");
    Ok(())
}
