//! The identity store: one primary identity per device.

use rusqlite::Connection;

use weft_crypto::ed25519::SigningKey;
use weft_crypto::x25519::AgreementSecret;
use weft_db::queries::identities;
use weft_types::identity::{Identity, IdentityExport, IDENTITY_EXPORT_VERSION};
use weft_types::PeerId;

use crate::{now_ms, MeshError, Result};

/// Load the primary identity, generating and persisting one if absent.
pub fn get_or_create_primary(conn: &Connection, display_name: &str) -> Result<Identity> {
    if let Some(identity) = identities::get_primary(conn)? {
        return Ok(identity);
    }

    let signing = SigningKey::generate();
    let agreement = AgreementSecret::generate();
    let identity = Identity {
        peer_id: PeerId::from_bytes(signing.verifying_key().to_bytes()),
        signing_seed: signing.to_bytes(),
        agreement_secret: agreement.to_bytes(),
        display_name: display_name.to_string(),
        created_at_ms: now_ms(),
    };
    identities::upsert(conn, &identity, true)?;
    tracing::info!(peer = %identity.peer_id, "created primary identity");
    Ok(identity)
}

/// Serialize an identity as a versioned export blob.
///
/// The blob contains private keys; it is the device-migration path and
/// never travels over the mesh.
pub fn export(identity: &Identity) -> Result<Vec<u8>> {
    let export = IdentityExport {
        version: IDENTITY_EXPORT_VERSION,
        identity: identity.clone(),
        exported_at_ms: now_ms(),
    };
    serde_json::to_vec(&export)
        .map_err(|e| MeshError::Db(weft_db::DbError::Serialization(e.to_string())))
}

/// Import an identity blob, installing it as the primary identity.
pub fn import(conn: &Connection, blob: &[u8]) -> Result<Identity> {
    let export: IdentityExport = serde_json::from_slice(blob).map_err(|e| {
        MeshError::Db(weft_db::DbError::CorruptSnapshot(e.to_string()))
    })?;
    if export.version != IDENTITY_EXPORT_VERSION {
        return Err(MeshError::Db(weft_db::DbError::CorruptSnapshot(format!(
            "unsupported identity export version {}",
            export.version
        ))));
    }
    // The peer ID must be the signing key; a blob that disagrees is
    // corrupt or tampered.
    let derived = PeerId::from_bytes(
        SigningKey::from_bytes(&export.identity.signing_seed)
            .verifying_key()
            .to_bytes(),
    );
    if derived != export.identity.peer_id {
        return Err(MeshError::Db(weft_db::DbError::CorruptSnapshot(
            "identity peer id does not match signing key".into(),
        )));
    }
    identities::upsert(conn, &export.identity, true)?;
    Ok(export.identity)
}

/// Rebuild the key objects from a stored identity.
pub fn keys_of(identity: &Identity) -> (SigningKey, AgreementSecret) {
    (
        SigningKey::from_bytes(&identity.signing_seed),
        AgreementSecret::from_bytes(identity.agreement_secret),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_then_load_is_stable() {
        let conn = weft_db::open_memory().expect("open");
        let first = get_or_create_primary(&conn, "alice").expect("create");
        let second = get_or_create_primary(&conn, "ignored").expect("load");
        assert_eq!(first.peer_id, second.peer_id);
        assert_eq!(second.display_name, "alice");
    }

    #[test]
    fn test_peer_id_is_signing_public_key() {
        let conn = weft_db::open_memory().expect("open");
        let identity = get_or_create_primary(&conn, "alice").expect("create");
        let (signing, _) = keys_of(&identity);
        assert_eq!(
            identity.peer_id.to_bytes(),
            signing.verifying_key().to_bytes()
        );
    }

    #[test]
    fn test_export_import_roundtrip() {
        let conn = weft_db::open_memory().expect("open");
        let identity = get_or_create_primary(&conn, "alice").expect("create");
        let blob = export(&identity).expect("export");

        let other = weft_db::open_memory().expect("open");
        let imported = import(&other, &blob).expect("import");
        assert_eq!(imported.peer_id, identity.peer_id);

        // The imported identity is the new device's primary.
        let primary = identities::get_primary(&other).expect("query").expect("present");
        assert_eq!(primary.peer_id, identity.peer_id);
    }

    #[test]
    fn test_import_rejects_mismatched_peer_id() {
        let conn = weft_db::open_memory().expect("open");
        let mut identity = get_or_create_primary(&conn, "alice").expect("create");
        identity.peer_id = PeerId::from_bytes([0xFF; 32]);
        let blob = export(&identity).expect("export");

        let other = weft_db::open_memory().expect("open");
        assert!(import(&other, &blob).is_err());
    }

    #[test]
    fn test_import_rejects_garbage() {
        let conn = weft_db::open_memory().expect("open");
        assert!(import(&conn, b"not json").is_err());
    }
}
