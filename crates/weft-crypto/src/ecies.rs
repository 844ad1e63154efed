//! Sealed boxes for signaling blobs (X25519 + HKDF + XChaCha20-Poly1305).
//!
//! Signaling payloads (SDP offers, candidate lists) traverse an untrusted
//! rendezvous service. They are sealed to the recipient's advertised X25519
//! key with a fresh ephemeral key per blob:
//!
//! ```text
//! seal(recipient_pk, pt):
//!   (eph_pk, shared) = ephemeral_agreement(recipient_pk)
//!   key   = HKDF-SHA-256(shared, salt = eph_pk || recipient_pk,
//!                        info = "weft v1 signaling")
//!   nonce = random 24 bytes
//!   ct    = XChaCha20-Poly1305(key, nonce, pt, aad = eph_pk)
//!   blob  = eph_pk || nonce || ct
//! ```

use crate::aead::{self, NONCE_SIZE, TAG_SIZE};
use crate::kdf;
use crate::x25519::{self, AgreementPublic, AgreementSecret};
use crate::{CryptoError, Result};

/// Info string binding derived keys to the signaling context.
const INFO_SIGNALING: &[u8] = b"weft v1 signaling";

/// A sealed signaling blob: ephemeral public key, nonce, ciphertext+tag.
pub struct SealedBlob {
    /// Sender's ephemeral X25519 public key.
    pub eph_pk: [u8; 32],
    /// Random AEAD nonce.
    pub nonce: [u8; NONCE_SIZE],
    /// Ciphertext with appended tag.
    pub ciphertext: Vec<u8>,
}

impl SealedBlob {
    /// Serialize as `eph_pk || nonce || ciphertext`.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(32 + NONCE_SIZE + self.ciphertext.len());
        out.extend_from_slice(&self.eph_pk);
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.ciphertext);
        out
    }

    /// Parse from the serialized layout.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let min = 32 + NONCE_SIZE + TAG_SIZE;
        if data.len() < min {
            return Err(CryptoError::ShortBuffer {
                need: min,
                got: data.len(),
            });
        }
        let mut eph_pk = [0u8; 32];
        eph_pk.copy_from_slice(&data[..32]);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&data[32..32 + NONCE_SIZE]);
        Ok(Self {
            eph_pk,
            nonce,
            ciphertext: data[32 + NONCE_SIZE..].to_vec(),
        })
    }
}

fn blob_key(
    shared: &x25519::SharedSecret,
    eph_pk: &[u8; 32],
    recipient_pk: &AgreementPublic,
) -> Result<kdf::SessionKey> {
    let mut salt = Vec::with_capacity(64);
    salt.extend_from_slice(eph_pk);
    salt.extend_from_slice(recipient_pk.as_bytes());
    kdf::derive_session_key(shared.as_bytes(), &salt, INFO_SIGNALING)
}

/// Seal a blob to a recipient's X25519 public key.
pub fn seal(recipient_pk: &AgreementPublic, plaintext: &[u8]) -> Result<SealedBlob> {
    let (eph_pk, shared) = x25519::ephemeral_agreement(recipient_pk)?;
    let key = blob_key(&shared, eph_pk.as_bytes(), recipient_pk)?;
    let nonce = aead::random_nonce();
    let ciphertext = aead::encrypt(&key, &nonce, plaintext, eph_pk.as_bytes())?;
    Ok(SealedBlob {
        eph_pk: eph_pk.to_bytes(),
        nonce,
        ciphertext,
    })
}

/// Open a sealed blob with the recipient's X25519 secret.
pub fn open(recipient_sk: &AgreementSecret, blob: &SealedBlob) -> Result<Vec<u8>> {
    let eph_pk = AgreementPublic::from_bytes(blob.eph_pk);
    let shared = recipient_sk.diffie_hellman(&eph_pk)?;
    let key = blob_key(&shared, &blob.eph_pk, &recipient_sk.public_key())?;
    aead::decrypt(&key, &blob.nonce, &blob.ciphertext, &blob.eph_pk)
}
