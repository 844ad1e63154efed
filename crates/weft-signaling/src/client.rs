//! The signaling client: encryption-in-transit over an opaque rendezvous.

use serde::{Deserialize, Serialize};

use weft_crypto::ecies;
use weft_crypto::x25519::{AgreementPublic, AgreementSecret};
use weft_types::PeerId;

use crate::{Result, SignalingChannel, SignalingError, SignalingMessage};

/// On-rendezvous framing for one signal.
#[derive(Serialize, Deserialize)]
struct SignalFrame {
    /// Whether `data` is an ECIES sealed box or plaintext.
    sealed: bool,
    /// The payload (sealed-box bytes or raw signaling payload).
    data: Vec<u8>,
}

/// A rendezvous client bound to one local identity.
pub struct SignalingClient<C: SignalingChannel> {
    channel: C,
    local: PeerId,
    local_secret: AgreementSecret,
}

impl<C: SignalingChannel> SignalingClient<C> {
    /// Create a client over `channel` for the local peer.
    pub fn new(channel: C, local: PeerId, local_secret: AgreementSecret) -> Self {
        Self {
            channel,
            local,
            local_secret,
        }
    }

    /// Register with the rendezvous and obtain the inbound stream.
    pub async fn open(&self) -> Result<tokio::sync::mpsc::Receiver<SignalingMessage>> {
        self.channel.open(self.local).await
    }

    /// Leave the rendezvous.
    pub async fn close(&self) -> Result<()> {
        self.channel.close(self.local).await
    }

    /// Post a signaling payload to a peer.
    ///
    /// When the recipient's X25519 key is known the payload travels as a
    /// sealed box. Without a key it goes in plaintext, which is permitted
    /// but logged: the rendezvous then sees the payload.
    pub async fn send_signal(
        &self,
        to: PeerId,
        recipient_pk: Option<&AgreementPublic>,
        payload: &[u8],
    ) -> Result<()> {
        let frame = match recipient_pk {
            Some(pk) => SignalFrame {
                sealed: true,
                data: ecies::seal(pk, payload)?.to_bytes(),
            },
            None => {
                tracing::warn!(
                    to = %to.short(),
                    "no recipient key known; posting plaintext signaling payload"
                );
                SignalFrame {
                    sealed: false,
                    data: payload.to_vec(),
                }
            }
        };
        let mut blob = Vec::new();
        ciborium::into_writer(&frame, &mut blob)
            .map_err(|e| SignalingError::Malformed(e.to_string()))?;
        self.channel.post(self.local, to, blob).await
    }

    /// Open a received blob, unsealing it when needed.
    pub fn decode_signal(&self, message: &SignalingMessage) -> Result<Vec<u8>> {
        let frame: SignalFrame = ciborium::from_reader(message.blob.as_slice())
            .map_err(|e| SignalingError::Malformed(e.to_string()))?;
        if !frame.sealed {
            tracing::warn!(from = %message.from.short(), "received plaintext signaling payload");
            return Ok(frame.data);
        }
        let sealed = ecies::SealedBlob::from_bytes(&frame.data)?;
        Ok(ecies::open(&self.local_secret, &sealed)?)
    }
}
