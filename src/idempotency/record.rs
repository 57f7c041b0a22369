use super::fingerprint::BodyHash;
use super::key::IdempotencyKey;
use crate::error::{AppError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use uuid::Uuid;

/// Layout version of [`ResponseSnapshot`] payloads written by this build.
pub const SNAPSHOT_VERSION: u8 = 1;

/// Durable proof that a key was processed, with the response to replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecord {
    pub id: Uuid,
    #[sqlx(rename = "idempotency_key")]
    pub key: String,
    pub body_hash: String,
    pub response_payload: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl IdempotencyRecord {
    pub fn new(
        key: &IdempotencyKey,
        body_hash: &BodyHash,
        response_payload: String,
        ttl: Duration,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            key: key.as_str().to_string(),
            body_hash: body_hash.as_str().to_string(),
            response_payload,
            created_at: now,
            updated_at: now,
            expires_at: now + ttl,
        }
    }

    /// A record stops counting as existing at its expiry instant.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn matches(&self, body_hash: &BodyHash) -> bool {
        self.body_hash == body_hash.as_str()
    }

    /// Time left before expiry, or `None` once the record is expired.
    pub fn remaining_ttl(&self, now: DateTime<Utc>) -> Option<std::time::Duration> {
        (self.expires_at - now).to_std().ok().filter(|d| !d.is_zero())
    }

    pub fn snapshot(&self) -> Result<ResponseSnapshot> {
        ResponseSnapshot::decode(&self.response_payload)
    }
}

/// Versioned, self-describing capture of a successful response.
///
/// `data` is kept as raw JSON so a replay emits exactly the bytes that were
/// produced by the first execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseSnapshot {
    pub version: u8,
    pub status: u16,
    pub message: String,
    pub data: Box<RawValue>,
}

impl ResponseSnapshot {
    pub fn capture<T: Serialize + ?Sized>(
        status: u16,
        message: impl Into<String>,
        output: &T,
    ) -> Result<Self> {
        let snapshot = Self {
            version: SNAPSHOT_VERSION,
            status,
            message: message.into(),
            data: serde_json::value::to_raw_value(output)?,
        };
        snapshot.validate()?;
        Ok(snapshot)
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a stored payload, refusing anything this build would not write.
    pub fn decode(payload: &str) -> Result<Self> {
        let snapshot: Self = serde_json::from_str(payload).map_err(|e| {
            AppError::InvariantViolation(format!("stored response payload is unreadable: {}", e))
        })?;
        snapshot.validate()?;
        Ok(snapshot)
    }

    fn validate(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(AppError::InvariantViolation(format!(
                "unsupported response snapshot version {}",
                self.version
            )));
        }
        if !self.data.get().trim_start().starts_with('{') {
            return Err(AppError::InvariantViolation(
                "response snapshot data must be a JSON object".to_string(),
            ));
        }
        Ok(())
    }
}
