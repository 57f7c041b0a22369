use axum::{
    extract::{
        rejection::{JsonRejection, PathRejection},
        OriginalUri, Path, Query, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Extension, Json,
};
use serde_json::value::RawValue;
use uuid::Uuid;
use validator::Validate;

use crate::api::requests::{
    describe_validation_errors, CreateConsumerRequest, CreateTransactionRequest, PaginationQuery,
    UpdateConsumerStatusRequest,
};
use crate::api::responses::{
    created_response, error_response, outcome_response, ApiResponse, ApiResult, ConsumerResponse,
    IdempotencyRecordResponse, IdempotencyStatsResponse, PaginatedResponse, TransactionResponse,
    TRANSACTION_CREATED,
};
use crate::error::AppError;
use crate::idempotency::{IdempotencyContext, IdempotencyKey};
use crate::models::{ConsumerStatus, NewTransaction};
use crate::observability::{HealthReport, HealthStatus};
use crate::services::{ConsumerService, CreateTransactionOperation, Page, TransactionService};

use super::routes::AppState;

fn ok<T>(status: StatusCode, message: &str, path: &str, data: T) -> (StatusCode, Json<ApiResponse<T>>) {
    (status, Json(ApiResponse::success(status, message, path, data)))
}

fn parse_json<T: Validate>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    let Json(request) = payload.map_err(|rejection| AppError::Validation(rejection.body_text()))?;
    request
        .validate()
        .map_err(|errors| AppError::Validation(describe_validation_errors(&errors)))?;
    Ok(request)
}

fn parse_id(id: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, AppError> {
    id.map(|Path(id)| id)
        .map_err(|_| AppError::Validation("Path parameter 'id' must be a UUID".to_string()))
}

// ============================================================================
// Health and Metrics
// ============================================================================

/// Aggregated dependency health.
pub async fn health_check(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> (StatusCode, Json<ApiResponse<HealthReport>>) {
    let health = state.health_checker.report().await;
    let status = if health.status == HealthStatus::Unhealthy {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    ok(status, "Health check completed", uri.path(), health)
}

/// Readiness check endpoint.
pub async fn readiness_check(State(state): State<AppState>) -> StatusCode {
    if state.health_checker.is_ready().await {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// The process answers, so it is alive.
pub async fn liveness_check() -> StatusCode {
    StatusCode::OK
}

/// Prometheus scrape endpoint.
pub async fn metrics_endpoint(State(state): State<AppState>) -> Response {
    match &state.metrics_handle {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// In-process idempotency counters.
pub async fn idempotency_stats(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
) -> (StatusCode, Json<ApiResponse<IdempotencyStatsResponse>>) {
    let stats = state.coordinator.stats().snapshot();
    ok(StatusCode::OK, "Idempotency statistics", uri.path(), stats)
}

// ============================================================================
// Idempotency Handlers
// ============================================================================

/// Inspect the live record for a key and the transactions booked under it.
pub async fn get_idempotency_record(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Path(raw_key): Path<String>,
) -> ApiResult<IdempotencyRecordResponse> {
    let path = uri.path();
    let lookup = async {
        let key = IdempotencyKey::parse(&raw_key, state.require_uuid_keys)?;
        let record = state
            .coordinator
            .find_record(&key)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("No live idempotency record for key '{}'", key)))?;

        let transaction_ids = TransactionService::new(state.pool.clone())
            .find_by_idempotency_key(key.as_str())
            .await?
            .into_iter()
            .map(|tx| tx.id)
            .collect();

        Ok::<_, AppError>(IdempotencyRecordResponse::new(record, transaction_ids))
    };

    match lookup.await {
        Ok(response) => Ok(ok(StatusCode::OK, "Idempotency record retrieved", path, response)),
        Err(e) => Err(error_response(path, &e)),
    }
}

// ============================================================================
// Consumer Handlers
// ============================================================================

/// Register a consumer.
pub async fn create_consumer(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    payload: Result<Json<CreateConsumerRequest>, JsonRejection>,
) -> ApiResult<ConsumerResponse> {
    let path = uri.path();
    let request = parse_json(payload).map_err(|e| error_response(path, &e))?;

    match ConsumerService::new(state.pool.clone()).create_consumer(request.into()).await {
        Ok(consumer) => Ok(ok(
            StatusCode::CREATED,
            "Consumer created successfully",
            path,
            ConsumerResponse::from(consumer),
        )),
        Err(e) => Err(error_response(path, &e)),
    }
}

/// Get consumer by ID.
pub async fn get_consumer(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<ConsumerResponse> {
    let path = uri.path();
    let id = parse_id(id).map_err(|e| error_response(path, &e))?;

    match ConsumerService::new(state.pool.clone()).find_by_id(id).await {
        Ok(consumer) => Ok(ok(StatusCode::OK, "Consumer retrieved", path, ConsumerResponse::from(consumer))),
        Err(e) => Err(error_response(path, &e)),
    }
}

/// Change a consumer's status.
pub async fn update_consumer_status(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    id: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<UpdateConsumerStatusRequest>, JsonRejection>,
) -> ApiResult<ConsumerResponse> {
    let path = uri.path();
    let id = parse_id(id).map_err(|e| error_response(path, &e))?;
    let Json(request) = payload
        .map_err(|rejection| error_response(path, &AppError::Validation(rejection.body_text())))?;

    match ConsumerService::new(state.pool.clone())
        .update_status(id, request.status)
        .await
    {
        Ok(consumer) => Ok(ok(
            StatusCode::OK,
            "Consumer status updated",
            path,
            ConsumerResponse::from(consumer),
        )),
        Err(e) => Err(error_response(path, &e)),
    }
}

async fn list_consumers_filtered(
    state: AppState,
    path: &str,
    status: Option<ConsumerStatus>,
    query: PaginationQuery,
) -> ApiResult<Vec<ConsumerResponse>> {
    let page = Page::new(query.page, query.limit);

    match ConsumerService::new(state.pool.clone())
        .list_consumers(status, page)
        .await
    {
        Ok(consumers) => Ok(ok(
            StatusCode::OK,
            "Consumers retrieved",
            path,
            consumers.into_iter().map(ConsumerResponse::from).collect(),
        )),
        Err(e) => Err(error_response(path, &e)),
    }
}

/// List consumers.
pub async fn list_consumers(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Vec<ConsumerResponse>> {
    list_consumers_filtered(state, uri.path(), None, query).await
}

pub async fn list_active_consumers(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Vec<ConsumerResponse>> {
    list_consumers_filtered(state, uri.path(), Some(ConsumerStatus::Active), query).await
}

pub async fn list_inactive_consumers(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Vec<ConsumerResponse>> {
    list_consumers_filtered(state, uri.path(), Some(ConsumerStatus::Inactive), query).await
}

pub async fn list_suspended_consumers(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<Vec<ConsumerResponse>> {
    list_consumers_filtered(state, uri.path(), Some(ConsumerStatus::Suspended), query).await
}

// ============================================================================
// Transaction Handlers
// ============================================================================

/// Create a transaction.
///
/// Behind the idempotency middleware the request arrives with an
/// [`IdempotencyContext`] and is booked through the Coordinator; without one
/// (enforcement disabled) it is booked directly and no record is kept.
pub async fn create_transaction(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    idempotency: Option<Extension<IdempotencyContext>>,
    payload: Result<Json<CreateTransactionRequest>, JsonRejection>,
) -> ApiResult<Box<RawValue>> {
    let path = uri.path();
    let input: NewTransaction = parse_json(payload)
        .map_err(|e| error_response(path, &e))?
        .into();

    let Some(Extension(ctx)) = idempotency else {
        let created = TransactionService::new(state.pool.clone())
            .create_transaction(&input)
            .await
            .map(TransactionResponse::from);
        return created_response(path, TRANSACTION_CREATED, created);
    };

    let operation = CreateTransactionOperation::new(input);
    outcome_response(path, state.coordinator.execute(&ctx, &operation).await)
}

/// List transactions, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    Query(query): Query<PaginationQuery>,
) -> ApiResult<PaginatedResponse<TransactionResponse>> {
    let path = uri.path();
    let page = Page::new(query.page, query.limit);

    match TransactionService::new(state.pool.clone())
        .list_transactions(page)
        .await
    {
        Ok((transactions, total)) => Ok(ok(
            StatusCode::OK,
            "Transactions retrieved",
            path,
            PaginatedResponse {
                items: transactions.into_iter().map(TransactionResponse::from).collect(),
                page: page.page,
                limit: page.limit,
                total,
            },
        )),
        Err(e) => Err(error_response(path, &e)),
    }
}

/// Get transaction by ID.
pub async fn get_transaction(
    State(state): State<AppState>,
    OriginalUri(uri): OriginalUri,
    id: Result<Path<Uuid>, PathRejection>,
) -> ApiResult<TransactionResponse> {
    let path = uri.path();
    let id = parse_id(id).map_err(|e| error_response(path, &e))?;

    match TransactionService::new(state.pool.clone()).find_by_id(id).await {
        Ok(tx) => Ok(ok(StatusCode::OK, "Transaction retrieved", path, TransactionResponse::from(tx))),
        Err(e) => Err(error_response(path, &e)),
    }
}

// ============================================================================
// Fallbacks
// ============================================================================

pub async fn not_found(OriginalUri(uri): OriginalUri) -> Response {
    let err = AppError::NotFound(format!("No route for '{}'", uri.path()));
    error_response(uri.path(), &err).into_response()
}
