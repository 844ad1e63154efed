//! # weft-transport
//!
//! The transport abstraction the mesh engine consumes, plus two reference
//! drivers:
//!
//! - [`mem`] — an in-process hub for tests and simulations, with link
//!   partitioning to exercise relay and store-and-forward paths
//! - [`tcp`] — length-prefixed frames over TCP for local networks
//!
//! A transport moves opaque byte messages between directly linked peers and
//! reports link lifecycle through [`TransportEvent`]s. The engine treats
//! every driver identically; WebRTC or BLE drivers implement the same
//! [`Transport`] trait out of tree.
//!
//! ## Event ordering
//!
//! For a given peer, `Message` events are delivered in transport-receive
//! order, and a `StateChange` is delivered before any `Message` that
//! depends on the new state.

pub mod mem;
pub mod tcp;

use async_trait::async_trait;
use tokio::sync::mpsc;

use weft_types::PeerId;

/// Error types for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// No live link to the peer.
    #[error("peer {0} is not connected")]
    Disconnected(PeerId),

    /// The outbound buffer for the peer is full.
    #[error("send buffer full for peer {0}")]
    SendBufferFull(PeerId),

    /// The transport is stopped or cannot reach the peer at all.
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    /// Connect attempt timed out.
    #[error("connection timed out")]
    Timeout,

    /// Malformed signaling blob or handshake frame.
    #[error("bad signaling: {0}")]
    Signaling(String),

    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Per-peer connection state machine.
///
/// ```text
/// New -> Connecting -> Connected -> (Disconnected | Failed) -> Closed
/// ```
///
/// Reconnection (for durable links) is the driver's business; the engine
/// only observes states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ConnectionState) -> bool {
        use ConnectionState::*;
        match (self, next) {
            (New, Connecting) => true,
            (Connecting, Connected) | (Connecting, Failed) => true,
            (Connected, Disconnected) | (Connected, Failed) => true,
            (Disconnected, Closed) | (Failed, Closed) => true,
            // A durable link may come back without being re-created.
            (Disconnected, Connecting) => true,
            _ => false,
        }
    }
}

/// Events a transport reports to the engine.
#[derive(Clone, Debug)]
pub enum TransportEvent {
    /// An inbound byte message from a directly linked peer.
    Message { from: PeerId, bytes: Vec<u8> },
    /// A link to `peer` came up.
    PeerConnected { peer: PeerId },
    /// The link to `peer` went down.
    PeerDisconnected { peer: PeerId },
    /// A connection state change for `peer`.
    StateChange {
        peer: PeerId,
        state: ConnectionState,
    },
    /// A non-fatal transport error worth surfacing.
    Error {
        peer: Option<PeerId>,
        message: String,
    },
}

/// Static information about a linked peer.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    pub peer_id: PeerId,
    pub state: ConnectionState,
    /// Driver-specific endpoint description (address, channel id).
    pub endpoint: Option<String>,
}

/// The contract every transport driver implements.
///
/// `send` resolves when the bytes are handed to the driver's buffer, not
/// on receipt. `start`/`stop` are idempotent.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Driver name for logs and stats.
    fn name(&self) -> &'static str;

    /// Start the driver; inbound traffic and lifecycle flow into `events`.
    async fn start(&self, events: mpsc::Sender<TransportEvent>) -> Result<()>;

    /// Stop the driver and drop all links.
    async fn stop(&self) -> Result<()>;

    /// Open a link to a peer, optionally using a signaling blob
    /// (address, SDP answer) obtained out of band.
    async fn connect(&self, peer: PeerId, signaling: Option<Vec<u8>>) -> Result<()>;

    /// Tear down the link to a peer.
    async fn disconnect(&self, peer: PeerId) -> Result<()>;

    /// Hand bytes to the peer's outbound buffer.
    async fn send(&self, peer: PeerId, bytes: Vec<u8>) -> Result<()>;

    /// Send to every linked peer except `except`.
    async fn broadcast(&self, bytes: Vec<u8>, except: Option<PeerId>) -> Result<()>;

    /// Peers with a live link right now.
    fn connected_peers(&self) -> Vec<PeerId>;

    /// Info for one peer, if the driver knows it.
    fn peer_info(&self, peer: &PeerId) -> Option<PeerInfo>;

    /// Connection state for one peer (`New` when unknown).
    fn connection_state(&self, peer: &PeerId) -> ConnectionState;

    /// Bytes sitting in outbound buffers; the engine's backpressure hint.
    fn buffered_bytes(&self) -> usize;
}
