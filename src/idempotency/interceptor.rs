//! Request boundary for idempotency enforcement.
//!
//! Runs the lookup phase before the handler: invalid keys and fingerprint
//! conflicts are answered here, and replays are served without reaching the
//! handler. Requests cleared to proceed carry an [`IdempotencyContext`]
//! extension that the handler passes to the Coordinator's record phase.

use super::coordinator::{Decision, IdempotencyContext, IdempotencyCoordinator};
use super::fingerprint::fingerprint;
use super::key::{KeyCheck, KeyValidator};
use super::storage::IdempotencyStore;
use crate::api::responses::{error_response, replay_response};
use crate::error::AppError;
use axum::{
    body::Body,
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use http_body_util::LengthLimitError;
use std::error::Error as _;
use std::sync::Arc;

/// Middleware state: the key rules and the Coordinator they feed.
pub struct Interceptor<S: IdempotencyStore> {
    validator: Arc<KeyValidator>,
    coordinator: Arc<IdempotencyCoordinator<S>>,
    body_limit: usize,
}

impl<S: IdempotencyStore> Clone for Interceptor<S> {
    fn clone(&self) -> Self {
        Self {
            validator: Arc::clone(&self.validator),
            coordinator: Arc::clone(&self.coordinator),
            body_limit: self.body_limit,
        }
    }
}

impl<S: IdempotencyStore> Interceptor<S> {
    pub fn new(
        validator: KeyValidator,
        coordinator: Arc<IdempotencyCoordinator<S>>,
        body_limit: usize,
    ) -> Self {
        Self {
            validator: Arc::new(validator),
            coordinator,
            body_limit,
        }
    }

    pub fn coordinator(&self) -> &Arc<IdempotencyCoordinator<S>> {
        &self.coordinator
    }
}

/// axum middleware; attach with `from_fn_with_state(interceptor, enforce::<S>)`.
pub async fn enforce<S: IdempotencyStore>(
    State(interceptor): State<Interceptor<S>>,
    request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let key = match interceptor.validator.check(request.method(), request.headers()) {
        Ok(KeyCheck::Bypass) => return next.run(request).await,
        Ok(KeyCheck::Enforce(key)) => key,
        Err(e) => return error_response(&path, &e).into_response(),
    };

    let (parts, body) = request.into_parts();
    let bytes = match axum::body::to_bytes(body, interceptor.body_limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = if exceeds_limit(&e) {
                AppError::PayloadTooLarge(format!(
                    "Request body exceeds {} bytes",
                    interceptor.body_limit
                ))
            } else {
                AppError::BadRequest(format!("Failed to read request body: {}", e))
            };
            return error_response(&path, &err).into_response();
        }
    };

    let body_hash = match fingerprint(&bytes) {
        Ok(hash) => hash,
        Err(e) => return error_response(&path, &e).into_response(),
    };

    match interceptor.coordinator.lookup(&key, &body_hash).await {
        Ok(Decision::Replay(replay)) => {
            tracing::debug!(path = %path, "Replaying stored response");
            replay_response(&path, replay).into_response()
        }
        Ok(Decision::Proceed(ctx)) => {
            let mut request = Request::from_parts(parts, Body::from(bytes));
            request.extensions_mut().insert::<IdempotencyContext>(ctx);
            next.run(request).await
        }
        Err(e) => error_response(&path, &e).into_response(),
    }
}

fn exceeds_limit(err: &axum::Error) -> bool {
    let mut source = err.source();
    while let Some(inner) = source {
        if inner.is::<LengthLimitError>() {
            return true;
        }
        source = inner.source();
    }
    false
}
