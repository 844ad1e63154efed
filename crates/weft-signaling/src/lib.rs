//! # weft-signaling
//!
//! Optional rendezvous client for exchanging transport signaling blobs
//! (SDP offers and answers, candidate lists) between peers that do not
//! yet share a mesh link.
//!
//! The rendezvous service itself is an external collaborator behind the
//! [`SignalingChannel`] trait; the core treats its payloads as opaque
//! bytes. Blobs are sealed to the recipient's advertised X25519 key with
//! an ephemeral exchange; plaintext is permitted only when no recipient
//! key is known, and is logged as a warning.

pub mod client;
pub mod mem;

use async_trait::async_trait;
use weft_types::PeerId;

/// Error types for signaling operations.
#[derive(Debug, thiserror::Error)]
pub enum SignalingError {
    /// The rendezvous service is unreachable or refused the operation.
    #[error("rendezvous unavailable: {0}")]
    Unavailable(String),

    /// A received blob could not be parsed.
    #[error("malformed signal: {0}")]
    Malformed(String),

    /// Sealing or opening a blob failed.
    #[error(transparent)]
    Crypto(#[from] weft_crypto::CryptoError),
}

pub type Result<T> = std::result::Result<T, SignalingError>;

/// A signaling blob delivered to the local peer.
#[derive(Clone, Debug)]
pub struct SignalingMessage {
    /// The peer that posted the blob.
    pub from: PeerId,
    /// The raw (still sealed) blob bytes.
    pub blob: Vec<u8>,
}

/// The rendezvous contract: post blobs to a peer's mailbox and receive
/// blobs posted to ours.
#[async_trait]
pub trait SignalingChannel: Send + Sync {
    /// Register the local peer and obtain the inbound blob stream.
    async fn open(
        &self,
        local: PeerId,
    ) -> Result<tokio::sync::mpsc::Receiver<SignalingMessage>>;

    /// Post a blob to a peer's mailbox.
    async fn post(&self, from: PeerId, to: PeerId, blob: Vec<u8>) -> Result<()>;

    /// Leave the rendezvous.
    async fn close(&self, local: PeerId) -> Result<()>;
}
