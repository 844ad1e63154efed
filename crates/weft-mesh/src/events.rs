//! Events the engine pushes to the application.
//!
//! Subscribers get an independent `tokio::sync::broadcast` receiver; slow
//! subscribers lag and lose the oldest events rather than stalling the
//! engine.

use tokio::sync::broadcast;

use weft_types::message::DeliveryStatus;
use weft_types::{MessageId, MessageKind, PeerId};

/// Capacity of the event broadcast channel.
pub const EVENT_CAPACITY: usize = 1024;

/// An event emitted by the mesh engine.
#[derive(Clone, Debug)]
pub enum MeshEvent {
    /// The engine is up.
    Started { local_peer: PeerId },
    /// The engine stopped.
    Stopped,
    /// A decrypted application message arrived.
    MessageReceived {
        from: PeerId,
        kind: MessageKind,
        payload: Vec<u8>,
        timestamp_ms: u64,
    },
    /// A locally originated message changed delivery status.
    MessageStatus {
        id: MessageId,
        status: DeliveryStatus,
    },
    /// A new peer appeared in the directory.
    PeerDiscovered { peer: PeerId },
    /// A transport link to a peer came up.
    PeerConnected { peer: PeerId },
    /// A transport link to a peer went down, or the peer went silent.
    PeerDisconnected { peer: PeerId },
    /// A queued message was evicted under pressure before delivery.
    QueueDropped { id: MessageId },
    /// A file transfer offer arrived.
    FileOffered {
        from: PeerId,
        transfer_id: [u8; 16],
        name: String,
        size: u64,
        chunk_count: u32,
    },
    /// A file chunk arrived.
    FileChunkReceived {
        from: PeerId,
        transfer_id: [u8; 16],
        index: u32,
        data: Vec<u8>,
    },
}

/// Broadcast fan-out for [`MeshEvent`]s.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<MeshEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CAPACITY)
    }
}

impl EventBus {
    /// Create a bus with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers. No subscribers is not an error.
    pub fn emit(&self, event: MeshEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events from this point on.
    pub fn subscribe(&self) -> broadcast::Receiver<MeshEvent> {
        self.sender.subscribe()
    }
}
