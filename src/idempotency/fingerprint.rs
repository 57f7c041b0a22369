use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Length of a hex-encoded SHA-256 digest.
pub const BODY_HASH_LEN: usize = 64;

/// SHA-256 digest of a raw request payload, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyHash(String);

impl BodyHash {
    /// Wraps an already computed digest, checking its shape.
    pub fn from_hex(hex_digest: &str) -> Result<Self> {
        let well_formed = hex_digest.len() == BODY_HASH_LEN
            && hex_digest.bytes().all(|b| b.is_ascii_hexdigit());
        if !well_formed {
            return Err(AppError::InvariantViolation(format!(
                "body hash must be {} hex characters",
                BODY_HASH_LEN
            )));
        }
        Ok(Self(hex_digest.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BodyHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hashes the undecoded request body.
///
/// An empty payload cannot be deduplicated meaningfully and is rejected
/// instead of being hashed to the digest of nothing.
pub fn fingerprint(body: &[u8]) -> Result<BodyHash> {
    if body.is_empty() {
        return Err(AppError::BadRequest(
            "Request body is required for idempotent requests".to_string(),
        ));
    }

    let mut hasher = Sha256::new();
    hasher.update(body);
    Ok(BodyHash(hex::encode(hasher.finalize())))
}
