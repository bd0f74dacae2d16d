//! Query cursors
//!
//! A cursor marks an absolute position in the unsliced result sequence of
//! one native query. It carries a fingerprint of that query so it cannot be
//! replayed against a different one. The web-safe form is URL-safe base64
//! (no padding) over a small JSON payload.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::errors::MisuseError;
use super::plan::NativeQuery;

/// Fingerprint length in bytes (hex-encoded in the payload)
const FINGERPRINT_BYTES: usize = 12;

/// Opaque resumption point for a streaming native query
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    #[serde(rename = "p")]
    position: u64,
    #[serde(rename = "q")]
    fingerprint: String,
}

impl Cursor {
    /// Cursor positioned at `position` within the results of `query`
    pub fn new(query: &NativeQuery, position: u64) -> Self {
        Self {
            position,
            fingerprint: fingerprint(query),
        }
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Checks that this cursor was issued for `query`
    pub fn verify(&self, query: &NativeQuery) -> Result<(), MisuseError> {
        if self.fingerprint == fingerprint(query) {
            Ok(())
        } else {
            Err(MisuseError::CursorMismatch)
        }
    }

    pub fn to_web_safe_string(&self) -> String {
        // Serializing two plain fields cannot fail.
        let payload = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(payload)
    }

    pub fn from_web_safe_string(encoded: &str) -> Result<Self, MisuseError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(encoded.trim())
            .map_err(|e| MisuseError::Cursor(e.to_string()))?;
        serde_json::from_slice(&bytes).map_err(|e| MisuseError::Cursor(e.to_string()))
    }
}

/// Hash over everything that identifies the result sequence; paging and
/// start position are excluded so any page of the same query shares it.
fn fingerprint(query: &NativeQuery) -> String {
    let identity = format!("{:?}", query.unpaged());
    let digest = Sha256::digest(identity.as_bytes());
    digest
        .iter()
        .take(FINGERPRINT_BYTES)
        .map(|b| format!("{:02x}", b))
        .collect()
}
