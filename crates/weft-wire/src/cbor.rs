//! CBOR helpers for payload bodies.
//!
//! The outer packet layout is fixed-width and hand-packed; everything
//! inside the payload field that has structure (envelopes, gossip,
//! acknowledgements) is CBOR (RFC 8949) via [`ciborium`].

use serde::{de::DeserializeOwned, Serialize};

use crate::WireError;

/// Serialize a value to CBOR bytes.
pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    let mut buf = Vec::new();
    ciborium::into_writer(value, &mut buf)
        .map_err(|e| WireError::Serialization(e.to_string()))?;
    Ok(buf)
}

/// Deserialize a value from CBOR bytes.
pub fn from_slice<T: DeserializeOwned>(data: &[u8]) -> Result<T, WireError> {
    ciborium::from_reader(data).map_err(|e| WireError::Deserialization(e.to_string()))
}
