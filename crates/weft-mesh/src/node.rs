//! The application-facing mesh facade.
//!
//! `MeshNode` is the composition surface: give it a validated config, an
//! identity, an open database, and the transports to drive, then `start`
//! it. Everything stateful runs in the engine task; the facade holds only
//! channel ends.

use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use weft_transport::Transport;
use weft_types::queue::Priority;
use weft_types::snapshot::MergeStrategy;
use weft_types::{MessageId, MessageKind, PeerId};

use crate::config::MeshConfig;
use crate::engine::{Command, Engine};
use crate::events::{EventBus, MeshEvent};
use crate::stats::MeshStats;
use crate::{MeshError, Result};

/// Capacity of the facade-to-engine command channel.
const COMMAND_CAPACITY: usize = 64;

/// Capacity of the shared transport event channel.
const TRANSPORT_EVENT_CAPACITY: usize = 1024;

/// How long `stop` waits for the engine to drain.
const STOP_DEADLINE: std::time::Duration = std::time::Duration::from_secs(5);

/// Options for [`MeshNode::send_message`].
#[derive(Clone, Copy, Debug)]
pub struct SendOptions {
    /// Application kind; defaults to text.
    pub kind: MessageKind,
    /// Queue priority if the message cannot be transmitted immediately.
    pub priority: Priority,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            kind: MessageKind::Text,
            priority: Priority::Normal,
        }
    }
}

struct StartParts {
    config: MeshConfig,
    identity: weft_types::identity::Identity,
    db: rusqlite::Connection,
}

/// A running (or startable) mesh node.
pub struct MeshNode {
    local: PeerId,
    transports: Vec<Arc<dyn Transport>>,
    events: EventBus,
    commands: Mutex<Option<mpsc::Sender<Command>>>,
    parts: Mutex<Option<StartParts>>,
    engine_task: Mutex<Option<JoinHandle<()>>>,
}

impl MeshNode {
    /// Build a node. The configuration is validated here; a bad config
    /// fails construction rather than startup.
    pub fn new(
        config: MeshConfig,
        identity: weft_types::identity::Identity,
        db: rusqlite::Connection,
        transports: Vec<Arc<dyn Transport>>,
    ) -> Result<Self> {
        config.validate()?;
        let local = identity.peer_id;
        Ok(Self {
            local,
            transports,
            events: EventBus::default(),
            commands: Mutex::new(None),
            parts: Mutex::new(Some(StartParts {
                config,
                identity,
                db,
            })),
            engine_task: Mutex::new(None),
        })
    }

    /// This node's mesh address.
    pub fn local_peer_id(&self) -> PeerId {
        self.local
    }

    /// Subscribe to engine events (messages, status changes, peer
    /// lifecycle).
    pub fn events(&self) -> broadcast::Receiver<MeshEvent> {
        self.events.subscribe()
    }

    /// Start the engine and all transports. Idempotent: a second call on
    /// a running node is a no-op.
    pub async fn start(&self) -> Result<()> {
        let parts = {
            let mut guard = self.parts.lock().expect("parts lock");
            match guard.take() {
                Some(parts) => parts,
                None => return Ok(()),
            }
        };

        let engine = Engine::new(
            parts.config,
            &parts.identity,
            parts.db,
            self.transports.clone(),
            self.events.clone(),
        )?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let (transport_tx, transport_rx) = mpsc::channel(TRANSPORT_EVENT_CAPACITY);

        for transport in &self.transports {
            transport.start(transport_tx.clone()).await?;
        }

        let task = tokio::spawn(engine.run(command_rx, transport_rx));

        *self.commands.lock().expect("commands lock") = Some(command_tx);
        *self.engine_task.lock().expect("task lock") = Some(task);
        tracing::info!(peer = %self.local, "mesh node started");
        Ok(())
    }

    /// Stop the engine and all transports, waiting a bounded time for
    /// in-flight handlers to drain.
    pub async fn stop(&self) {
        let sender = self.commands.lock().expect("commands lock").take();
        if let Some(sender) = sender {
            let _ = sender.send(Command::Stop).await;
        }

        let task = self.engine_task.lock().expect("task lock").take();
        if let Some(task) = task {
            if tokio::time::timeout(STOP_DEADLINE, task).await.is_err() {
                tracing::warn!("engine did not stop within deadline");
            }
        }

        for transport in &self.transports {
            if let Err(e) = transport.stop().await {
                tracing::warn!(transport = transport.name(), error = %e, "transport stop failed");
            }
        }
    }

    /// Send an application payload to a peer.
    ///
    /// Returns the message ID immediately; delivery progress arrives as
    /// [`MeshEvent::MessageStatus`] events. Fails fast on rate limiting,
    /// blacklists, oversized payloads, and unknown peers.
    pub async fn send_message(
        &self,
        recipient: PeerId,
        payload: Vec<u8>,
        options: SendOptions,
    ) -> Result<MessageId> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SendMessage {
            recipient,
            content: payload,
            kind: options.kind,
            priority: options.priority,
            reply,
        })
        .await?;
        rx.await.map_err(|_| MeshError::Stopped)?
    }

    /// Send a read receipt for a received message.
    pub async fn mark_read(&self, id: MessageId) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::MarkRead { id, reply }).await?;
        rx.await.map_err(|_| MeshError::Stopped)?
    }

    /// Blacklist or un-blacklist a peer.
    pub async fn set_blacklisted(&self, peer: PeerId, value: bool) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::SetBlacklisted { peer, value, reply })
            .await?;
        rx.await.map_err(|_| MeshError::Stopped)?
    }

    /// Cancel a still-queued message. Returns whether an entry was
    /// removed (after transport hand-off there is nothing to cancel).
    pub async fn cancel_queued(&self, id: MessageId) -> Result<bool> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::CancelQueued { id, reply }).await?;
        rx.await.map_err(|_| MeshError::Stopped)
    }

    /// Peers with a live transport link.
    pub async fn connected_peers(&self) -> Result<Vec<PeerId>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::ConnectedPeers { reply }).await?;
        rx.await.map_err(|_| MeshError::Stopped)
    }

    /// Peers currently known reachable through the directory.
    pub async fn discovered_peers(&self) -> Result<Vec<PeerId>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::DiscoveredPeers { reply }).await?;
        rx.await.map_err(|_| MeshError::Stopped)
    }

    /// Engine counters since start.
    pub async fn stats(&self) -> Result<MeshStats> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::Stats { reply }).await?;
        rx.await.map_err(|_| MeshError::Stopped)
    }

    /// Export all persisted state as a snapshot document.
    pub async fn export_snapshot(&self) -> Result<Vec<u8>> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::ExportSnapshot { reply }).await?;
        rx.await.map_err(|_| MeshError::Stopped)?
    }

    /// Import a snapshot document with the given merge strategy.
    pub async fn import_snapshot(
        &self,
        bytes: Vec<u8>,
        strategy: MergeStrategy,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.command(Command::ImportSnapshot {
            bytes,
            strategy,
            reply,
        })
        .await?;
        rx.await.map_err(|_| MeshError::Stopped)?
    }

    async fn command(&self, command: Command) -> Result<()> {
        let sender = {
            let guard = self.commands.lock().expect("commands lock");
            guard.clone()
        };
        let Some(sender) = sender else {
            return Err(MeshError::NotStarted);
        };
        sender.send(command).await.map_err(|_| MeshError::Stopped)
    }

    /// The transports this node drives. Fixed at construction.
    pub fn transports(&self) -> &[Arc<dyn Transport>] {
        &self.transports
    }
}
