use axum::http::StatusCode;
use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, AppError>;

/// Errors raised across the service.
#[derive(Debug, Error)]
pub enum AppError {
    /// Missing or malformed idempotency key.
    #[error("{0}")]
    BadRequest(String),

    /// Idempotency enforcement attached to a non-mutating verb.
    #[error("{0}")]
    MethodNotAllowed(String),

    /// Request body exceeds the configured limit.
    #[error("{0}")]
    PayloadTooLarge(String),

    /// Request field validation failed.
    #[error("{0}")]
    Validation(String),

    /// Request is well-formed but refers to data in an unusable state.
    #[error("{0}")]
    InvalidData(String),

    #[error("{0}")]
    NotFound(String),

    /// Same idempotency key presented with a different payload.
    #[error("{0}")]
    Conflict(String),

    /// Another worker currently holds the claim lock for the key.
    #[error("{0}")]
    RequestInFlight(String),

    /// Durable uniqueness violation on an idempotency key.
    #[error("duplicate idempotency key: {0}")]
    DuplicateKey(String),

    /// Fast cache or durable store could not be reached.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Cache and durable store disagree in a way reconciliation cannot repair.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// HTTP status surfaced to the caller for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::Validation(_) | AppError::InvalidData(_) => {
                StatusCode::BAD_REQUEST
            }
            AppError::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::RequestInFlight(_) => StatusCode::CONFLICT,
            AppError::DuplicateKey(_)
            | AppError::StoreUnavailable(_)
            | AppError::InvariantViolation(_)
            | AppError::Database(_)
            | AppError::Redis(_)
            | AppError::Serialization(_)
            | AppError::Config(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Short title used as the envelope `message`.
    pub fn title(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "Bad Request",
            AppError::MethodNotAllowed(_) => "Method Not Allowed",
            AppError::PayloadTooLarge(_) => "Payload Too Large",
            AppError::Validation(_) => "Validation Failed",
            AppError::InvalidData(_) => "Invalid Data",
            AppError::NotFound(_) => "Not Found",
            AppError::Conflict(_) | AppError::RequestInFlight(_) => "Conflict",
            _ => "Internal Server Error",
        }
    }

    /// Returns true for errors whose detail must not reach the caller.
    pub fn is_internal(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Detail exposed in the envelope `error` field.
    pub fn public_detail(&self) -> String {
        if self.is_internal() {
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(AppError::BadRequest("k".into()).status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::MethodNotAllowed("get".into()).status_code(),
            StatusCode::METHOD_NOT_ALLOWED
        );
        assert_eq!(AppError::Conflict("c".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::RequestInFlight("c".into()).status_code(), StatusCode::CONFLICT);
        assert_eq!(AppError::NotFound("n".into()).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            AppError::PayloadTooLarge("big".into()).status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            AppError::StoreUnavailable("redis".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            AppError::InvariantViolation("x".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_internal_detail_is_hidden() {
        let err = AppError::StoreUnavailable("connection refused at 10.0.0.3".into());
        assert_eq!(err.public_detail(), "An internal error occurred");

        let err = AppError::Conflict("key reused".into());
        assert_eq!(err.public_detail(), "key reused");
    }
}
