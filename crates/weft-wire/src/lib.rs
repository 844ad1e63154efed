//! # weft-wire
//!
//! The Weft on-wire format. Two layers:
//!
//! - [`packet`] — the signed outer packet with a fixed-width, big-endian
//!   header. This layout is the compatibility contract across
//!   implementations and versions; it is bit-exact.
//! - [`payload`] — typed payload bodies (CBOR-serialized via [`cbor`])
//!   carried inside the outer packet: the session-encrypted envelope,
//!   gossip announcements, acknowledgements, and file-transfer framing.
//!
//! Signatures are verified before any state derived from a packet is
//! touched; decode failures carry a [`WireError`] naming what was wrong.

pub mod cbor;
pub mod packet;
pub mod payload;

/// Error types for wire encoding and decoding.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The version byte is not one this implementation speaks.
    #[error("unknown wire version: {0}")]
    UnknownVersion(u8),

    /// The declared payload exceeds the configured packet budget.
    #[error("packet too large: {got} bytes exceeds limit {limit}")]
    TooLarge { got: usize, limit: usize },

    /// The buffer ended before the declared layout did.
    #[error("truncated packet: need {need} bytes, got {got}")]
    Truncated { need: usize, got: usize },

    /// Structurally invalid packet (bad kind, trailing bytes, ID mismatch).
    #[error("malformed packet: {0}")]
    Malformed(String),

    /// The outer signature did not verify.
    #[error("bad packet signature")]
    BadSignature,

    /// CBOR payload-body serialization failed.
    #[error("payload serialization failed: {0}")]
    Serialization(String),

    /// CBOR payload-body deserialization failed.
    #[error("payload deserialization failed: {0}")]
    Deserialization(String),
}

pub type Result<T> = std::result::Result<T, WireError>;
