//! The signed outer packet.
//!
//! ## Wire layout (big-endian, bit-exact)
//!
//! ```text
//! offset  len  field
//!      0    1  version        (currently 1)
//!      1    1  kind           (message-kind registry)
//!      2    1  ttl            (hop budget)
//!      3    8  timestamp      (u64, ms since epoch)
//!     11   32  sender         (raw Ed25519 public key)
//!     43   16  message id     (SHA-256-128 of sender ‖ ts ‖ payload)
//!     59    2  payload length (u16)
//!     61    N  payload
//!   61+N   64  signature      (Ed25519 over bytes [0 .. 61+N))
//! ```
//!
//! Decoding checks version and bounds; [`Packet::verify`] checks the
//! signature and the message-ID commitment. Nothing downstream of the
//! router trusts a packet that has not passed `verify`.
//!
//! The signature covers the header and payload with the TTL byte
//! canonicalized to zero: TTL is the one field relays mutate in flight,
//! and decrementing it must not break end-to-end authentication. Every
//! other header field is immutable once sealed.

use weft_crypto::ed25519::{Signature, SigningKey, VerifyingKey, SIGNATURE_LEN};
use weft_crypto::hash;
use weft_types::{MessageId, MessageKind, PeerId, PROTOCOL_VERSION};

use crate::{Result, WireError};

/// Fixed header length preceding the payload.
pub const HEADER_LEN: usize = 61;

/// Smallest possible packet: empty payload plus signature.
pub const MIN_PACKET_LEN: usize = HEADER_LEN + SIGNATURE_LEN;

const OFF_VERSION: usize = 0;
const OFF_KIND: usize = 1;
const OFF_TTL: usize = 2;
const OFF_TIMESTAMP: usize = 3;
const OFF_SENDER: usize = 11;
const OFF_MESSAGE_ID: usize = 43;
const OFF_PAYLOAD_LEN: usize = 59;

/// A decoded (or freshly sealed) outer packet.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    /// Wire version; always [`PROTOCOL_VERSION`] for packets we seal.
    pub version: u8,
    /// Application kind.
    pub kind: MessageKind,
    /// Remaining hop budget.
    pub ttl: u8,
    /// Origination time, unix millis.
    pub timestamp_ms: u64,
    /// Originating peer (also the signing key).
    pub sender: PeerId,
    /// Truncated-SHA-256 commitment to (sender, timestamp, payload).
    pub message_id: MessageId,
    /// Opaque payload bytes.
    pub payload: Vec<u8>,
    /// Ed25519 signature over the header and payload.
    pub signature: [u8; 64],
}

impl Packet {
    /// Build and sign a packet from its logical fields.
    ///
    /// Computes the message ID, packs the signed region, and signs it with
    /// `signing_key`. The sender field is derived from the signing key.
    pub fn seal(
        kind: MessageKind,
        ttl: u8,
        timestamp_ms: u64,
        payload: Vec<u8>,
        signing_key: &SigningKey,
    ) -> Result<Self> {
        if payload.len() > u16::MAX as usize {
            return Err(WireError::TooLarge {
                got: payload.len(),
                limit: u16::MAX as usize,
            });
        }
        let sender_bytes = signing_key.verifying_key().to_bytes();
        let message_id = hash::message_id(&sender_bytes, timestamp_ms, &payload);

        let mut packet = Self {
            version: PROTOCOL_VERSION,
            kind,
            ttl,
            timestamp_ms,
            sender: PeerId::from_bytes(sender_bytes),
            message_id,
            payload,
            signature: [0u8; 64],
        };
        let signed_region = packet.signed_region();
        packet.signature = signing_key.sign(&signed_region).to_bytes();
        Ok(packet)
    }

    /// Total encoded length of this packet.
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len() + SIGNATURE_LEN
    }

    /// Serialize to the wire layout.
    ///
    /// The wire carries the live TTL at offset 2; only the signature input
    /// has it canonicalized to zero.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = self.signed_region();
        out[OFF_TTL] = self.ttl;
        out.extend_from_slice(&self.signature);
        out
    }

    /// Parse a packet from wire bytes.
    ///
    /// `max_packet_bytes` bounds the whole encoded packet; anything larger
    /// is rejected before allocation of the payload. The buffer must
    /// contain exactly one packet.
    pub fn decode(bytes: &[u8], max_packet_bytes: usize) -> Result<Self> {
        if bytes.len() > max_packet_bytes {
            return Err(WireError::TooLarge {
                got: bytes.len(),
                limit: max_packet_bytes,
            });
        }
        if bytes.len() < MIN_PACKET_LEN {
            return Err(WireError::Truncated {
                need: MIN_PACKET_LEN,
                got: bytes.len(),
            });
        }

        let version = bytes[OFF_VERSION];
        if version != PROTOCOL_VERSION {
            return Err(WireError::UnknownVersion(version));
        }

        let kind = MessageKind::from_u8(bytes[OFF_KIND])
            .map_err(|e| WireError::Malformed(e.to_string()))?;
        let ttl = bytes[OFF_TTL];

        let timestamp_ms = u64::from_be_bytes(
            bytes[OFF_TIMESTAMP..OFF_TIMESTAMP + 8]
                .try_into()
                .map_err(|_| WireError::Malformed("timestamp".into()))?,
        );

        let mut sender = [0u8; 32];
        sender.copy_from_slice(&bytes[OFF_SENDER..OFF_SENDER + 32]);

        let mut message_id = [0u8; 16];
        message_id.copy_from_slice(&bytes[OFF_MESSAGE_ID..OFF_MESSAGE_ID + 16]);

        let payload_len = u16::from_be_bytes(
            bytes[OFF_PAYLOAD_LEN..OFF_PAYLOAD_LEN + 2]
                .try_into()
                .map_err(|_| WireError::Malformed("payload length".into()))?,
        ) as usize;

        let total = HEADER_LEN + payload_len + SIGNATURE_LEN;
        if bytes.len() < total {
            return Err(WireError::Truncated {
                need: total,
                got: bytes.len(),
            });
        }
        if bytes.len() > total {
            return Err(WireError::Malformed(format!(
                "{} trailing bytes after packet",
                bytes.len() - total
            )));
        }

        let payload = bytes[HEADER_LEN..HEADER_LEN + payload_len].to_vec();
        let mut signature = [0u8; 64];
        signature.copy_from_slice(&bytes[HEADER_LEN + payload_len..total]);

        Ok(Self {
            version,
            kind,
            ttl,
            timestamp_ms,
            sender: PeerId::from_bytes(sender),
            message_id,
            payload,
            signature,
        })
    }

    /// Verify the signature and the message-ID commitment.
    ///
    /// The signing key is the sender field itself, so a packet is
    /// self-authenticating: whoever holds the private half of the claimed
    /// sender address produced it.
    pub fn verify(&self) -> Result<()> {
        let expected_id =
            hash::message_id(self.sender.as_bytes(), self.timestamp_ms, &self.payload);
        if expected_id != self.message_id {
            return Err(WireError::Malformed("message id mismatch".into()));
        }

        let key = VerifyingKey::from_bytes(self.sender.as_bytes())
            .map_err(|_| WireError::BadSignature)?;
        let signature = Signature::from_bytes(&self.signature);
        key.verify(&self.signed_region(), &signature)
            .map_err(|_| WireError::BadSignature)
    }

    /// The bytes covered by the signature: header plus payload, with the
    /// TTL byte canonicalized to zero so relays can decrement it.
    fn signed_region(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.payload.len());
        out.push(self.version);
        out.push(self.kind.as_u8());
        out.push(0);
        out.extend_from_slice(&self.timestamp_ms.to_be_bytes());
        out.extend_from_slice(self.sender.as_bytes());
        out.extend_from_slice(&self.message_id);
        out.extend_from_slice(&(self.payload.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.payload);
        out
    }
}
