//! Local identity records and the export blob.

use serde::{Deserialize, Serialize};
use serde_with::serde_as;

use crate::PeerId;

/// Version tag for identity export blobs.
pub const IDENTITY_EXPORT_VERSION: u32 = 1;

/// A device-resident identity: both long-term keypairs plus metadata.
///
/// Private key material lives only in this record and the local database;
/// the mesh never transmits it. Exactly one identity per device is primary.
#[serde_as]
#[derive(Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Mesh address: hex of the Ed25519 public key.
    pub peer_id: PeerId,
    /// Ed25519 signing-key seed.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub signing_seed: [u8; 32],
    /// X25519 static agreement secret.
    #[serde_as(as = "serde_with::hex::Hex")]
    pub agreement_secret: [u8; 32],
    /// User-chosen display name.
    pub display_name: String,
    /// Creation time, unix millis.
    pub created_at_ms: u64,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Secrets stay out of Debug output.
        f.debug_struct("Identity")
            .field("peer_id", &self.peer_id)
            .field("display_name", &self.display_name)
            .field("created_at_ms", &self.created_at_ms)
            .finish_non_exhaustive()
    }
}

/// A versioned, self-contained identity export.
///
/// This is the only migration path between devices. It includes private
/// keys, so callers treat the serialized form as a secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdentityExport {
    /// Blob format version.
    pub version: u32,
    /// The exported identity, private keys included.
    pub identity: Identity,
    /// Export time, unix millis.
    pub exported_at_ms: u64,
}
