use axum::{http::StatusCode, Json};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::value::{to_raw_value, RawValue};
use uuid::Uuid;

use crate::error::{AppError, Result as AppResult};
use crate::idempotency::{IdempotencyRecord, Outcome, Replay, StatsSnapshot};
use crate::models::{Consumer, ConsumerStatus, Transaction, TransactionStatus, TransactionType};

/// Message carried by every replayed response.
pub const REPLAY_MESSAGE: &str = "Request already processed";

pub const TRANSACTION_CREATED: &str = "Transaction created successfully";

/// Response envelope shared by every endpoint, whatever the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub message: String,
    pub error: Option<String>,
    pub path: String,
    pub status: u16,
    pub data: Option<T>,
    pub timestamp: DateTime<Utc>,
}

impl<T> ApiResponse<T> {
    pub fn success(status: StatusCode, message: impl Into<String>, path: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            error: None,
            path: path.into(),
            status: status.as_u16(),
            data: Some(data),
            timestamp: Utc::now(),
        }
    }
}

impl ApiResponse<()> {
    pub fn failure(status: StatusCode, message: impl Into<String>, path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            error: Some(error.into()),
            path: path.into(),
            status: status.as_u16(),
            data: None,
            timestamp: Utc::now(),
        }
    }
}

/// Error half of every handler result.
pub type ErrorReply = (StatusCode, Json<ApiResponse<()>>);

/// Handler result carrying `T` in the envelope.
pub type ApiResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ErrorReply>;

/// Renders an error into the envelope. Internal details are logged, not returned.
pub fn error_response(path: &str, err: &AppError) -> ErrorReply {
    let status = err.status_code();
    if err.is_internal() {
        tracing::error!(path = %path, error = %err, "Request failed");
    } else {
        tracing::debug!(path = %path, error = %err, "Request rejected");
    }
    (
        status,
        Json(ApiResponse::failure(status, err.title(), path, err.public_detail())),
    )
}

/// Replays a stored result. `data` is emitted exactly as first recorded.
pub fn replay_response(path: &str, replay: Replay) -> (StatusCode, Json<ApiResponse<Box<RawValue>>>) {
    (
        StatusCode::OK,
        Json(ApiResponse::success(StatusCode::OK, REPLAY_MESSAGE, path, replay.data)),
    )
}

/// Envelope for a protected write: the recorded status on first execution,
/// a replay otherwise.
pub fn outcome_response(path: &str, outcome: AppResult<Outcome>) -> ApiResult<Box<RawValue>> {
    match outcome {
        Ok(Outcome::Executed(snapshot)) => {
            let status = StatusCode::from_u16(snapshot.status).unwrap_or(StatusCode::CREATED);
            Ok((
                status,
                Json(ApiResponse::success(status, snapshot.message, path, snapshot.data)),
            ))
        }
        Ok(Outcome::Replayed(replay)) => Ok(replay_response(path, replay)),
        Err(e) => Err(error_response(path, &e)),
    }
}

/// Envelope for a write that ran without idempotency enforcement.
pub fn created_response<T: Serialize>(path: &str, message: &str, created: AppResult<T>) -> ApiResult<Box<RawValue>> {
    let data = created
        .and_then(|value| Ok(to_raw_value(&value)?))
        .map_err(|e| error_response(path, &e))?;
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(StatusCode::CREATED, message, path, data)),
    ))
}

/// Consumer response DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerResponse {
    pub id: Uuid,
    pub fullname: String,
    pub username: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub birth_date: NaiveDate,
    pub status: ConsumerStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Consumer> for ConsumerResponse {
    fn from(consumer: Consumer) -> Self {
        Self {
            id: consumer.id,
            fullname: consumer.fullname,
            username: consumer.username,
            email: consumer.email,
            phone: consumer.phone,
            address: consumer.address,
            birth_date: consumer.birth_date,
            status: consumer.status,
            created_at: consumer.created_at,
            updated_at: consumer.updated_at,
        }
    }
}

/// Transaction response DTO.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: Uuid,
    pub idempotency_key: Option<String>,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub consumer_id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Transaction> for TransactionResponse {
    fn from(tx: Transaction) -> Self {
        Self {
            id: tx.id,
            idempotency_key: tx.idempotency_key,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            status: tx.status,
            consumer_id: tx.consumer_id,
            created_at: tx.created_at,
            updated_at: tx.updated_at,
        }
    }
}

/// Paginated list payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub limit: i64,
    pub total: i64,
}

/// Inspection view of a stored idempotency record.
///
/// The stored response itself is not exposed; only its metadata and the
/// transactions that reference the key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdempotencyRecordResponse {
    pub key: String,
    pub body_hash: String,
    pub response_status: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub transaction_ids: Vec<Uuid>,
}

impl IdempotencyRecordResponse {
    pub fn new(record: IdempotencyRecord, transaction_ids: Vec<Uuid>) -> Self {
        let response_status = record.snapshot().ok().map(|s| s.status);
        Self {
            key: record.key,
            body_hash: record.body_hash,
            response_status,
            created_at: record.created_at,
            updated_at: record.updated_at,
            expires_at: record.expires_at,
            transaction_ids,
        }
    }
}

/// Coordinator counters as served by the stats endpoint.
pub type IdempotencyStatsResponse = StatsSnapshot;
