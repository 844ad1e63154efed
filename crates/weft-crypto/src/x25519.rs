//! X25519 key agreement (RFC 7748).
//!
//! Used for session establishment: each identity carries a long-lived
//! static X25519 key, and every handshake mixes it with a fresh ephemeral
//! key. An all-zero shared secret (the output of a small-order public key)
//! is rejected as non-contributory.

use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::Zeroize;

use crate::{CryptoError, Result};

/// An X25519 static secret for long-lived agreement keys.
#[derive(Clone, Zeroize)]
#[zeroize(drop)]
pub struct AgreementSecret {
    inner: StaticSecret,
}

/// An X25519 public key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgreementPublic {
    bytes: [u8; 32],
}

/// A 32-byte X25519 shared secret, zeroized on drop.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct SharedSecret {
    bytes: [u8; 32],
}

impl AgreementSecret {
    /// Generate a fresh random secret.
    pub fn generate() -> Self {
        Self {
            inner: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Rebuild from raw bytes (clamped per RFC 7748).
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self {
            inner: StaticSecret::from(bytes),
        }
    }

    /// The raw bytes of this secret.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.inner.to_bytes()
    }

    /// The corresponding public key.
    pub fn public_key(&self) -> AgreementPublic {
        AgreementPublic {
            bytes: PublicKey::from(&self.inner).to_bytes(),
        }
    }

    /// Perform Diffie-Hellman agreement with a remote public key.
    ///
    /// Fails with [`CryptoError::BadKey`] when the result is all zero,
    /// which happens only for small-order (malicious) public keys.
    pub fn diffie_hellman(&self, their_public: &AgreementPublic) -> Result<SharedSecret> {
        let pk = PublicKey::from(their_public.bytes);
        let shared = self.inner.diffie_hellman(&pk);
        let bytes = *shared.as_bytes();
        if bytes == [0u8; 32] {
            return Err(CryptoError::BadKey("non-contributory X25519 exchange".into()));
        }
        Ok(SharedSecret { bytes })
    }
}

impl AgreementPublic {
    /// Rebuild from raw bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// The raw bytes of this public key.
    pub fn to_bytes(&self) -> [u8; 32] {
        self.bytes
    }

    /// The raw bytes as a borrowed array.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

impl SharedSecret {
    /// The raw bytes of the shared secret.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }
}

/// Generate an ephemeral keypair and agree with a remote public key.
///
/// Returns the ephemeral public key (to send to the peer) and the shared
/// secret. The ephemeral secret never leaves this function.
pub fn ephemeral_agreement(
    their_public: &AgreementPublic,
) -> Result<(AgreementPublic, SharedSecret)> {
    // StaticSecret rather than EphemeralSecret: the secret still lives only
    // inside this frame, but the contributory check needs the raw output.
    let secret = AgreementSecret::generate();
    let public = secret.public_key();
    let shared = secret.diffie_hellman(their_public)?;
    Ok((public, shared))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agreement_matches() {
        let a = AgreementSecret::generate();
        let b = AgreementSecret::generate();

        let ab = a.diffie_hellman(&b.public_key()).expect("contributory");
        let ba = b.diffie_hellman(&a.public_key()).expect("contributory");

        assert_eq!(ab.as_bytes(), ba.as_bytes());
    }

    #[test]
    fn test_ephemeral_agreement() {
        let responder = AgreementSecret::generate();
        let (eph_pub, initiator_shared) =
            ephemeral_agreement(&responder.public_key()).expect("contributory");
        let responder_shared = responder.diffie_hellman(&eph_pub).expect("contributory");
        assert_eq!(initiator_shared.as_bytes(), responder_shared.as_bytes());
    }

    #[test]
    fn test_rejects_low_order_point() {
        // The identity point forces an all-zero shared secret.
        let secret = AgreementSecret::generate();
        let low_order = AgreementPublic::from_bytes([0u8; 32]);
        assert!(secret.diffie_hellman(&low_order).is_err());
    }

    #[test]
    fn test_from_bytes_roundtrip() {
        let secret = AgreementSecret::generate();
        let restored = AgreementSecret::from_bytes(secret.to_bytes());
        assert_eq!(
            secret.public_key().to_bytes(),
            restored.public_key().to_bytes()
        );
    }

    #[test]
    fn test_rfc7748_vector() {
        // RFC 7748 section 6.1.
        let alice_secret = hex_literal::hex!(
            "77076d0a7318a57d3c16c17251b26645df4c2f87ebc0992ab177fba51db92c2a"
        );
        let alice_public = hex_literal::hex!(
            "8520f0098930a754748b7ddcb43ef75a0dbf3a0d26381af4eba4a98eaa9b4e6a"
        );
        let secret = AgreementSecret::from_bytes(alice_secret);
        assert_eq!(secret.public_key().to_bytes(), alice_public);
    }
}
