use crate::config::IdempotencySettings;
use crate::error::{AppError, Result};
use http::{HeaderMap, HeaderName, Method};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Upper bound on a client key when UUID shape is not enforced.
pub const MAX_KEY_LEN: usize = 128;

/// Client-supplied idempotency key, normalized and safe to use as a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    /// Parses a raw header value.
    ///
    /// With `require_uuid` the key must be a UUID and is normalized to its
    /// lowercase hyphenated form, so `K1` in any casing maps to one record.
    pub fn parse(raw: &str, require_uuid: bool) -> Result<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AppError::BadRequest("Idempotency key cannot be empty".to_string()));
        }

        if require_uuid {
            let uuid = Uuid::parse_str(trimmed).map_err(|_| {
                AppError::BadRequest("Idempotency key must be a valid UUID".to_string())
            })?;
            return Ok(Self(uuid.hyphenated().to_string()));
        }

        if trimmed.len() > MAX_KEY_LEN {
            return Err(AppError::BadRequest(format!(
                "Idempotency key must be at most {} characters",
                MAX_KEY_LEN
            )));
        }
        if !trimmed.bytes().all(|b| b.is_ascii_graphic()) {
            return Err(AppError::BadRequest(
                "Idempotency key must contain printable ASCII characters only".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Fast-cache key: `{prefix}{key}`.
    pub fn cache_key(&self, prefix: &str) -> String {
        format!("{}{}", prefix, self.0)
    }

    /// Fast-cache key of the claim lock for this idempotency key.
    pub fn lock_key(&self, prefix: &str) -> String {
        format!("{}lock:{}", prefix, self.0)
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of validating a request against the enforcement rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyCheck {
    /// Enforcement is disabled; the request runs without a record.
    Bypass,
    /// The request carries a usable key and must go through the Coordinator.
    Enforce(IdempotencyKey),
}

/// Returns true for the side-effecting verbs idempotency applies to.
pub fn is_mutating(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::DELETE)
}

/// Validates the idempotency key carried by a request.
#[derive(Debug, Clone)]
pub struct KeyValidator {
    enabled: bool,
    header: HeaderName,
    header_label: String,
    require_uuid: bool,
}

impl KeyValidator {
    pub fn new(settings: &IdempotencySettings) -> Result<Self> {
        let label = settings.key_header.trim().to_string();
        let header = HeaderName::from_bytes(label.as_bytes()).map_err(|e| {
            AppError::Internal(anyhow::anyhow!("Invalid idempotency key header '{}': {}", label, e))
        })?;

        Ok(Self {
            enabled: settings.enabled,
            header,
            header_label: label,
            require_uuid: settings.require_uuid_keys,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }

    /// Applies the rules in order: enforcement toggle, verb, presence, shape.
    pub fn check(&self, method: &Method, headers: &HeaderMap) -> Result<KeyCheck> {
        if !self.enabled {
            return Ok(KeyCheck::Bypass);
        }

        if !is_mutating(method) {
            return Err(AppError::MethodNotAllowed(
                "Idempotency enforcement only supports POST, PUT, or DELETE methods".to_string(),
            ));
        }

        let missing = || {
            AppError::BadRequest(format!(
                "Idempotency key header '{}' is required",
                self.header_label
            ))
        };

        let raw = match headers.get(&self.header) {
            Some(value) => value.to_str().map_err(|_| {
                AppError::BadRequest(format!(
                    "Idempotency key header '{}' must be visible ASCII",
                    self.header_label
                ))
            })?,
            None => return Err(missing()),
        };

        if raw.trim().is_empty() {
            return Err(missing());
        }

        IdempotencyKey::parse(raw, self.require_uuid).map(KeyCheck::Enforce)
    }
}
