//! Per-peer encryption sessions.
//!
//! The first outbound packet to a peer generates an ephemeral X25519 key,
//! derives direction-bound keys from the shared secret, and carries the
//! ephemeral public key inline in the envelope. The handshake fields keep
//! riding along until the peer proves key possession by sending something
//! we can decrypt; after that, envelopes are lean.
//!
//! Either side may re-handshake at any time and the latest handshake wins;
//! the receive key it displaces stays valid for a grace window so packets
//! already in flight (and simultaneous-handshake crossovers) still
//! decrypt.
//!
//! Nonces are 24 random bytes per operation from the OS CSPRNG; the
//! XChaCha20 nonce space makes collisions implausible long before the
//! rotation caps (message count, age) force fresh keys.

use std::collections::HashMap;

use weft_crypto::aead;
use weft_crypto::kdf::{self, SessionKey};
use weft_crypto::x25519::{AgreementPublic, AgreementSecret};
use weft_types::session::{KeyDirection, SessionKeyRecord};
use weft_types::PeerId;
use weft_wire::payload::SecureEnvelope;

/// How many displaced receive keys to keep for the grace window.
const PREV_RX_KEEP: usize = 2;

/// Session-layer failures.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// No session and no known X25519 key for the peer.
    #[error("no agreement key known for peer")]
    NoPeerKey,

    /// The envelope referenced a rotation we no longer (or never) had.
    #[error("unknown session rotation {rotation}")]
    UnknownRotation { rotation: u32, reset: bool },

    /// AEAD authentication failed. `reset` reports that the failure
    /// threshold tripped and the session was torn down.
    #[error("session decrypt failed")]
    AuthFail { reset: bool },

    /// Underlying crypto failure (bad key, non-contributory exchange).
    #[error(transparent)]
    Crypto(#[from] weft_crypto::CryptoError),
}

/// Rotation and failure policy knobs.
#[derive(Clone, Copy, Debug)]
pub struct SessionPolicy {
    pub max_messages: u64,
    pub max_age_ms: u64,
    pub grace_ms: u64,
    pub fail_threshold: u32,
}

struct PrevRx {
    rotation: u32,
    key: SessionKey,
    valid_until_ms: u64,
}

struct Session {
    rotation: u32,
    tx_key: SessionKey,
    rx_key: SessionKey,
    prev_rx: Vec<PrevRx>,
    created_at_ms: u64,
    messages_sent: u64,
    aead_fails: u32,
    /// True once the peer has demonstrably decrypted our handshake (we
    /// decrypted something from them); handshake fields stop riding along.
    confirmed: bool,
    /// Our ephemeral public key, re-sent while unconfirmed.
    our_eph_pk: Option<[u8; 32]>,
}

impl Session {
    fn needs_rotation(&self, now_ms: u64, policy: &SessionPolicy) -> bool {
        self.messages_sent >= policy.max_messages
            || now_ms.saturating_sub(self.created_at_ms) >= policy.max_age_ms
    }

    fn displace_rx(&mut self, now_ms: u64, grace_ms: u64) {
        self.prev_rx.insert(
            0,
            PrevRx {
                rotation: self.rotation,
                key: self.rx_key.clone(),
                valid_until_ms: now_ms + grace_ms,
            },
        );
        self.prev_rx.truncate(PREV_RX_KEEP);
    }
}

/// Owns every live session. Single-writer (the engine task).
pub struct SessionManager {
    local_secret: AgreementSecret,
    local_public: AgreementPublic,
    sessions: HashMap<PeerId, Session>,
    policy: SessionPolicy,
}

impl SessionManager {
    /// Create a manager around the local static agreement secret.
    pub fn new(local_secret: AgreementSecret, policy: SessionPolicy) -> Self {
        let local_public = local_secret.public_key();
        Self {
            local_secret,
            local_public,
            sessions: HashMap::new(),
            policy,
        }
    }

    /// The local static X25519 public key (advertised in gossip).
    pub fn local_public(&self) -> AgreementPublic {
        self.local_public
    }

    /// Whether a live session with the peer exists.
    pub fn has_session(&self, peer: &PeerId) -> bool {
        self.sessions.contains_key(peer)
    }

    /// Encrypt `content` for `peer`, handshaking or rotating first when
    /// needed. `peer_pk` is required only when a fresh handshake is.
    pub fn encrypt(
        &mut self,
        peer: PeerId,
        peer_pk: Option<&AgreementPublic>,
        content: &[u8],
        now_ms: u64,
    ) -> Result<SecureEnvelope, SessionError> {
        let must_handshake = match self.sessions.get(&peer) {
            None => true,
            Some(s) => s.needs_rotation(now_ms, &self.policy),
        };
        if must_handshake {
            let pk = peer_pk.ok_or(SessionError::NoPeerKey)?;
            self.handshake(peer, pk, now_ms)?;
        }

        let session = self
            .sessions
            .get_mut(&peer)
            .ok_or(SessionError::NoPeerKey)?;

        let nonce = aead::random_nonce();
        let aad = envelope_aad(&peer, session.rotation);
        let ciphertext = aead::encrypt(&session.tx_key, &nonce, content, &aad)?;
        session.messages_sent += 1;

        let (eph_pk, sender_agreement_pk) = if session.confirmed {
            (None, None)
        } else {
            (session.our_eph_pk, Some(self.local_public.to_bytes()))
        };

        Ok(SecureEnvelope {
            to: peer,
            rotation: session.rotation,
            eph_pk,
            sender_agreement_pk,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt an envelope from `peer`, deriving responder keys when it
    /// carries a handshake.
    pub fn decrypt(
        &mut self,
        peer: PeerId,
        envelope: &SecureEnvelope,
        now_ms: u64,
    ) -> Result<Vec<u8>, SessionError> {
        if let Some(eph_bytes) = envelope.eph_pk {
            self.accept_handshake(peer, eph_bytes, envelope.rotation, now_ms)?;
        }

        let fail_threshold = self.policy.fail_threshold;

        let session = self.sessions.get_mut(&peer).ok_or({
            SessionError::UnknownRotation {
                rotation: envelope.rotation,
                reset: false,
            }
        })?;

        // Simultaneous handshakes can leave two key sets at the same
        // rotation (one per DH exchange), so every candidate for the
        // envelope's rotation gets a try: the current key first, then any
        // grace-retained ones.
        let mut candidates: Vec<SessionKey> = Vec::with_capacity(1 + PREV_RX_KEEP);
        if envelope.rotation == session.rotation {
            candidates.push(session.rx_key.clone());
        }
        for prev in &session.prev_rx {
            if prev.rotation == envelope.rotation && now_ms <= prev.valid_until_ms {
                candidates.push(prev.key.clone());
            }
        }
        if candidates.is_empty() {
            return Err(SessionError::UnknownRotation {
                rotation: envelope.rotation,
                reset: false,
            });
        }

        let aad = envelope_aad(&envelope.to, envelope.rotation);
        for key in &candidates {
            if let Ok(plaintext) =
                aead::decrypt(key, &envelope.nonce, &envelope.ciphertext, &aad)
            {
                session.aead_fails = 0;
                session.confirmed = true;
                return Ok(plaintext);
            }
        }

        session.aead_fails += 1;
        let reset = session.aead_fails >= fail_threshold;
        if reset {
            self.sessions.remove(&peer);
            tracing::warn!(peer = %peer.short(), "session reset after repeated AEAD failures");
        }
        Err(SessionError::AuthFail { reset })
    }

    /// Drop the session with a peer (peer delete, blacklist).
    pub fn forget(&mut self, peer: &PeerId) {
        self.sessions.remove(peer);
    }

    /// Project current keys as persistable records.
    pub fn export_records(&self) -> Vec<SessionKeyRecord> {
        let mut records = Vec::with_capacity(self.sessions.len() * 2);
        for (peer, session) in &self.sessions {
            let expires_at_ms = session.created_at_ms + self.policy.max_age_ms;
            records.push(SessionKeyRecord {
                peer_id: *peer,
                key: session.tx_key.to_bytes(),
                direction: KeyDirection::Tx,
                created_at_ms: session.created_at_ms,
                expires_at_ms,
                rotation: session.rotation,
            });
            records.push(SessionKeyRecord {
                peer_id: *peer,
                key: session.rx_key.to_bytes(),
                direction: KeyDirection::Rx,
                created_at_ms: session.created_at_ms,
                expires_at_ms,
                rotation: session.rotation,
            });
        }
        records
    }

    /// Restore sessions from persisted records (highest rotation per peer
    /// wins; incomplete pairs are skipped).
    pub fn restore(&mut self, records: &[SessionKeyRecord], now_ms: u64) {
        let mut by_peer: HashMap<PeerId, (Option<&SessionKeyRecord>, Option<&SessionKeyRecord>)> =
            HashMap::new();
        for record in records {
            if record.expires_at_ms <= now_ms {
                continue;
            }
            let slot = by_peer.entry(record.peer_id).or_default();
            let existing_rotation = slot
                .0
                .or(slot.1)
                .map(|r| r.rotation)
                .unwrap_or(0);
            if record.rotation < existing_rotation {
                continue;
            }
            if record.rotation > existing_rotation {
                *slot = (None, None);
            }
            match record.direction {
                KeyDirection::Tx => slot.0 = Some(record),
                KeyDirection::Rx => slot.1 = Some(record),
            }
        }
        for (peer, (tx, rx)) in by_peer {
            let (Some(tx), Some(rx)) = (tx, rx) else { continue };
            self.sessions.insert(
                peer,
                Session {
                    rotation: tx.rotation,
                    tx_key: SessionKey::from_bytes(tx.key),
                    rx_key: SessionKey::from_bytes(rx.key),
                    prev_rx: Vec::new(),
                    created_at_ms: tx.created_at_ms,
                    messages_sent: 0,
                    aead_fails: 0,
                    confirmed: true,
                    our_eph_pk: None,
                },
            );
        }
    }

    /// Sweep sessions past their lifetime. Returns the peers affected.
    pub fn sweep_expired(&mut self, now_ms: u64) -> Vec<PeerId> {
        let max_age = self.policy.max_age_ms;
        let expired: Vec<PeerId> = self
            .sessions
            .iter()
            .filter(|(_, s)| now_ms.saturating_sub(s.created_at_ms) >= max_age)
            .map(|(peer, _)| *peer)
            .collect();
        for peer in &expired {
            self.sessions.remove(peer);
        }
        expired
    }

    /// Initiate (or rotate) a session with a fresh ephemeral key.
    fn handshake(
        &mut self,
        peer: PeerId,
        peer_pk: &AgreementPublic,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        let (eph_pk, shared) = weft_crypto::x25519::ephemeral_agreement(peer_pk)?;
        let (tx_key, rx_key) = kdf::derive_direction_keys(shared.as_bytes(), true)?;

        let (rotation, prev_rx) = match self.sessions.remove(&peer) {
            Some(mut old) => {
                old.displace_rx(now_ms, self.policy.grace_ms);
                (old.rotation + 1, old.prev_rx)
            }
            None => (0, Vec::new()),
        };

        self.sessions.insert(
            peer,
            Session {
                rotation,
                tx_key,
                rx_key,
                prev_rx,
                created_at_ms: now_ms,
                messages_sent: 0,
                aead_fails: 0,
                confirmed: false,
                our_eph_pk: Some(eph_pk.to_bytes()),
            },
        );
        tracing::debug!(peer = %peer.short(), rotation, "session handshake initiated");
        Ok(())
    }

    /// Accept a peer's handshake, deriving responder keys. The latest
    /// handshake wins; the displaced receive key stays in grace.
    fn accept_handshake(
        &mut self,
        peer: PeerId,
        eph_bytes: [u8; 32],
        rotation: u32,
        now_ms: u64,
    ) -> Result<(), SessionError> {
        if let Some(existing) = self.sessions.get(&peer) {
            // A stale or replayed handshake must not roll keys backwards.
            if rotation < existing.rotation {
                return Ok(());
            }
            // Re-deriving from the same ephemeral is idempotent; skip the
            // displacement bookkeeping when nothing changes.
            if rotation == existing.rotation && existing.our_eph_pk.is_none() {
                return Ok(());
            }
        }

        let eph = AgreementPublic::from_bytes(eph_bytes);
        let shared = self.local_secret.diffie_hellman(&eph)?;
        let (tx_key, rx_key) = kdf::derive_direction_keys(shared.as_bytes(), false)?;

        let prev_rx = match self.sessions.remove(&peer) {
            Some(mut old) => {
                old.displace_rx(now_ms, self.policy.grace_ms);
                old.prev_rx
            }
            None => Vec::new(),
        };

        self.sessions.insert(
            peer,
            Session {
                rotation,
                tx_key,
                rx_key,
                prev_rx,
                created_at_ms: now_ms,
                messages_sent: 0,
                aead_fails: 0,
                confirmed: false,
                our_eph_pk: None,
            },
        );
        tracing::debug!(peer = %peer.short(), rotation, "session handshake accepted");
        Ok(())
    }
}

/// AAD binds ciphertext to the logical recipient and rotation so an
/// envelope cannot be re-addressed or replayed across rotations.
fn envelope_aad(to: &PeerId, rotation: u32) -> Vec<u8> {
    let mut aad = Vec::with_capacity(36);
    aad.extend_from_slice(to.as_bytes());
    aad.extend_from_slice(&rotation.to_be_bytes());
    aad
}
