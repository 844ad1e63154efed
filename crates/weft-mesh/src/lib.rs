//! # weft-mesh
//!
//! The device-resident mesh engine: per-peer encryption sessions, the
//! routing/relay/gossip state machines, the store-and-forward queue, rate
//! limiting, peer health, and the application-facing [`MeshNode`] facade.
//!
//! ## Architecture
//!
//! All mutable mesh state lives inside a single engine task
//! ([`engine`]); the facade talks to it over a command channel and
//! receives [`MeshEvent`]s over a broadcast channel. Transports feed the
//! same loop through their event channels, and timers (gossip, queue
//! flush, expiry sweeps, health checks) are `tokio` intervals selected in
//! the same loop. Nothing mutates peer, route, session, or queue state
//! from outside that task.

pub mod config;
pub mod dedup;
pub mod engine;
pub mod events;
pub mod gossip;
pub mod health;
pub mod identity;
pub mod limiter;
pub mod node;
pub mod queue;
pub mod router;
pub mod session;
pub mod stats;

pub use config::MeshConfig;
pub use events::MeshEvent;
pub use node::MeshNode;

/// Error types surfaced by the mesh engine.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// Outbound rate limit hit for the destination.
    #[error("rate limited for destination {0}")]
    RateLimited(weft_types::PeerId),

    /// The destination is blacklisted.
    #[error("peer {0} is blacklisted")]
    PeerBlacklisted(weft_types::PeerId),

    /// The store-and-forward queue refused the message.
    #[error("queue full")]
    QueueFull,

    /// The engine is not running.
    #[error("mesh node is not started")]
    NotStarted,

    /// The engine stopped before answering.
    #[error("mesh node stopped")]
    Stopped,

    /// Configuration rejected at startup.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Payload too large for a single packet.
    #[error("payload of {got} bytes exceeds limit {limit}")]
    PayloadTooLarge { got: usize, limit: usize },

    /// The destination's X25519 key has never been learned, so no session
    /// can be established yet.
    #[error("no agreement key known for peer {0}")]
    PeerKeyUnknown(weft_types::PeerId),

    /// A cryptographic operation failed.
    #[error(transparent)]
    Crypto(#[from] weft_crypto::CryptoError),

    /// Wire encoding/decoding failed.
    #[error(transparent)]
    Wire(#[from] weft_wire::WireError),

    /// Persistence failed.
    #[error(transparent)]
    Db(#[from] weft_db::DbError),

    /// A transport operation failed.
    #[error(transparent)]
    Transport(#[from] weft_transport::TransportError),
}

pub type Result<T> = std::result::Result<T, MeshError>;

/// Current time as unix milliseconds.
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
