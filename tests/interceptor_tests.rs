use axum::{
    body::Body,
    extract::{OriginalUri, State},
    http::{Method, Request, StatusCode},
    middleware,
    routing::{get, post},
    Extension, Json, Router,
};
use idempotent_payments::api::responses::{
    created_response, outcome_response, ApiResponse, ApiResult, TRANSACTION_CREATED,
};
use idempotent_payments::config::IdempotencySettings;
use idempotent_payments::error::{AppError, Result};
use idempotent_payments::idempotency::{
    enforce, fingerprint, CoordinatorConfig, IdempotencyContext, IdempotencyCoordinator,
    IdempotencyKey, Interceptor, KeyValidator, MemoryIdempotencyCache, MemoryIdempotencyStore,
    MemoryIdempotencyTx, ProtectedOperation,
};
use serde_json::value::RawValue;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

type Coordinator = IdempotencyCoordinator<MemoryIdempotencyStore>;

const K1: &str = "5d1f2a9c-7b3e-4c8d-9e0f-1a2b3c4d5e6f";
const K2: &str = "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d";
const CONSUMER: &str = "3f6c2b1a-0e9d-4c8b-a7f6-5e4d3c2b1a09";
const MISSING_CONSUMER: &str = "00000000-0000-4000-8000-000000000000";

/// Books a payment into the memory store's entity log.
struct BookPayment {
    request: Value,
}

#[async_trait::async_trait]
impl ProtectedOperation<MemoryIdempotencyTx> for BookPayment {
    type Output = Value;

    fn success_message(&self) -> String {
        TRANSACTION_CREATED.to_string()
    }

    async fn execute(&self, tx: &mut MemoryIdempotencyTx, key: &IdempotencyKey) -> Result<Value> {
        if self.request["consumerId"] == MISSING_CONSUMER {
            return Err(AppError::NotFound("Consumer not found".to_string()));
        }
        // Keeps the record transaction open long enough for duplicates to overlap.
        tokio::time::sleep(Duration::from_millis(30)).await;
        let entity = json!({
            "id": uuid::Uuid::new_v4(),
            "idempotencyKey": key.as_str(),
            "type": self.request["type"],
            "amount": self.request["amount"],
            "consumerId": self.request["consumerId"],
            "status": "pending",
            "createdAt": chrono::Utc::now(),
        });
        tx.stage_entity(entity.clone());
        Ok(entity)
    }
}

/// Mirrors the transaction handler with the memory store behind it.
async fn create_payment(
    State(coordinator): State<Arc<Coordinator>>,
    OriginalUri(uri): OriginalUri,
    ctx: Option<Extension<IdempotencyContext>>,
    Json(request): Json<Value>,
) -> ApiResult<Box<RawValue>> {
    let path = uri.path();

    let Some(Extension(ctx)) = ctx else {
        return created_response(path, TRANSACTION_CREATED, Ok(json!({ "unprotected": true })));
    };

    outcome_response(path, coordinator.execute(&ctx, &BookPayment { request }).await)
}

async fn report() -> StatusCode {
    StatusCode::OK
}

struct TestApp {
    router: Router,
    store: MemoryIdempotencyStore,
    cache: MemoryIdempotencyCache,
}

fn app_with(settings: IdempotencySettings) -> TestApp {
    let store = MemoryIdempotencyStore::new();
    let cache = MemoryIdempotencyCache::new(settings.key_prefix.clone());
    let coordinator = Arc::new(IdempotencyCoordinator::new(
        store.clone(),
        Arc::new(cache.clone()),
        CoordinatorConfig::from(&settings),
    ));
    let interceptor = Interceptor::new(
        KeyValidator::new(&settings).unwrap(),
        Arc::clone(&coordinator),
        64 * 1024,
    );
    let guard = middleware::from_fn_with_state(interceptor, enforce::<MemoryIdempotencyStore>);

    let router = Router::new()
        .route(
            "/api/v1/transactions",
            post(create_payment).route_layer(guard.clone()),
        )
        .route("/api/v1/reports", get(report).route_layer(guard))
        .with_state(coordinator);

    TestApp { router, store, cache }
}

fn app() -> TestApp {
    app_with(IdempotencySettings::default())
}

fn payment(amount: u64, consumer: &str) -> String {
    json!({ "type": "payment", "amount": amount, "consumerId": consumer }).to_string()
}

fn post_request(key: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri("/api/v1/transactions")
        .header("content-type", "application/json");
    if let Some(key) = key {
        builder = builder.header("Idempotency-Key", key);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, ApiResponse<Box<RawValue>>) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let envelope: ApiResponse<Box<RawValue>> = serde_json::from_slice(&bytes).unwrap();
    (status, envelope)
}

fn data_of(envelope: &ApiResponse<Box<RawValue>>) -> &str {
    envelope.data.as_ref().map(|d| d.get()).unwrap()
}

#[tokio::test]
async fn test_first_request_creates_entity_and_record() {
    let app = app();
    let body = payment(150_000, CONSUMER);

    let (status, envelope) = send(&app.router, post_request(Some(K1), &body)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(envelope.status, 201);
    assert!(envelope.error.is_none());
    assert_eq!(envelope.path, "/api/v1/transactions");

    let record = app.store.record(K1).await.expect("record stored");
    assert_eq!(record.body_hash, fingerprint(body.as_bytes()).unwrap().as_str());
    assert_eq!(app.store.entities().await.len(), 1);
    assert!(app.cache.contains(&format!("idempotency:{}", K1)).await);
}

#[tokio::test]
async fn test_same_key_different_body_conflicts() {
    let app = app();
    send(&app.router, post_request(Some(K1), &payment(150_000, CONSUMER))).await;

    let (status, envelope) = send(&app.router, post_request(Some(K1), &payment(170_000, CONSUMER))).await;

    assert_eq!(status, StatusCode::CONFLICT);
    assert!(envelope.data.is_none());
    assert!(envelope.error.is_some());

    let entities = app.store.entities().await;
    assert_eq!(entities.len(), 1);
    assert_eq!(entities[0]["amount"], 150_000);
}

#[tokio::test]
async fn test_retry_replays_identical_data() {
    let app = app();
    let body = payment(150_000, CONSUMER);

    let (first_status, first) = send(&app.router, post_request(Some(K1), &body)).await;
    assert_eq!(first_status, StatusCode::CREATED);

    for _ in 0..3 {
        let (status, replay) = send(&app.router, post_request(Some(K1), &body)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(replay.message, "Request already processed");
        assert_eq!(data_of(&replay), data_of(&first));
    }

    assert_eq!(app.store.entities().await.len(), 1);
    assert_eq!(app.store.record_count().await, 1);
}

#[tokio::test]
async fn test_business_failure_leaves_no_record() {
    let app = app();

    let (status, _) = send(&app.router, post_request(Some(K2), &payment(150_000, MISSING_CONSUMER))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(app.store.record(K2).await.is_none());
    assert!(app.store.entities().await.is_empty());
}

#[tokio::test]
async fn test_missing_key_is_rejected() {
    let app = app();

    let (status, envelope) = send(&app.router, post_request(None, &payment(150_000, CONSUMER))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        envelope.error.as_deref(),
        Some("Idempotency key header 'Idempotency-Key' is required")
    );
    assert_eq!(app.store.record_count().await, 0);
    assert!(app.store.entities().await.is_empty());
}

#[tokio::test]
async fn test_malformed_key_is_rejected() {
    let app = app();

    let (status, _) = send(&app.router, post_request(Some("not-a-uuid"), &payment(1, CONSUMER))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.record_count().await, 0);
}

#[tokio::test]
async fn test_empty_body_is_rejected() {
    let app = app();

    let (status, _) = send(&app.router, post_request(Some(K1), "")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.store.record_count().await, 0);
}

#[tokio::test]
async fn test_key_case_is_normalized() {
    let app = app();
    let body = payment(150_000, CONSUMER);

    send(&app.router, post_request(Some(&K1.to_uppercase()), &body)).await;
    let (status, _) = send(&app.router, post_request(Some(K1), &body)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.entities().await.len(), 1);
}

#[tokio::test]
async fn test_non_mutating_verb_is_not_allowed() {
    let app = app();
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/v1/reports")
        .header("Idempotency-Key", K1)
        .body(Body::empty())
        .unwrap();

    let (status, envelope) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(envelope.status, 405);
}

#[tokio::test]
async fn test_disabled_enforcement_keeps_no_records() {
    let settings = IdempotencySettings {
        enabled: false,
        ..IdempotencySettings::default()
    };
    let app = app_with(settings);
    let body = payment(150_000, CONSUMER);

    for key in [Some(K1), None, Some(K1)] {
        let (status, envelope) = send(&app.router, post_request(key, &body)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(data_of(&envelope), r#"{"unprotected":true}"#);
    }

    assert_eq!(app.store.record_count().await, 0);
    assert!(app.cache.keys().await.is_empty());
}

#[tokio::test]
async fn test_concurrent_duplicates_replay_with_default_settings() {
    let app = app();
    let body = payment(150_000, CONSUMER);

    let (a, b, c) = tokio::join!(
        send(&app.router, post_request(Some(K1), &body)),
        send(&app.router, post_request(Some(K1), &body)),
        send(&app.router, post_request(Some(K1), &body)),
    );

    let mut statuses = vec![a.0, b.0, c.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::OK, StatusCode::CREATED]);
    assert_eq!(data_of(&a.1), data_of(&b.1));
    assert_eq!(data_of(&b.1), data_of(&c.1));
    assert_eq!(app.store.entities().await.len(), 1);
}

#[tokio::test]
async fn test_oversized_body_is_rejected() {
    let app = app();
    let body = format!(r#"{{"type":"payment","amount":1,"memo":"{}"}}"#, "x".repeat(70 * 1024));

    let (status, envelope) = send(&app.router, post_request(Some(K1), &body)).await;

    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(envelope.status, 413);
    assert_eq!(app.store.record_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_duplicates_book_once() {
    let settings = IdempotencySettings {
        lock_enabled: false,
        ..IdempotencySettings::default()
    };
    let app = app_with(settings);
    let body = payment(150_000, CONSUMER);

    let (a, b) = tokio::join!(
        send(&app.router, post_request(Some(K1), &body)),
        send(&app.router, post_request(Some(K1), &body)),
    );

    let mut statuses = vec![a.0, b.0];
    statuses.sort();
    assert_eq!(statuses, vec![StatusCode::OK, StatusCode::CREATED]);
    assert_eq!(data_of(&a.1), data_of(&b.1));
    assert_eq!(app.store.entities().await.len(), 1);
}

#[tokio::test]
async fn test_cache_outage_fails_closed() {
    let app = app();
    app.cache.set_offline(true);

    let (status, envelope) = send(&app.router, post_request(Some(K1), &payment(1, CONSUMER))).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(envelope.error.as_deref(), Some("An internal error occurred"));
    assert!(app.store.entities().await.is_empty());
}
