//! Key issuance boundary
//!
//! ```text
//! POST /v1/keys             {userId, keyType}        -> {encryptionKey}
//! POST /v1/boundary/seal    {userId, key, data}      -> {data}   primary payload
//! POST /v1/boundary/open    {userId, key, data}      -> {data}   plaintext
//! ```
//!
//! Every route requires `Authorization: Bearer <token>`. The token must map to
//! the `userId` in the body; a key is never issued for anyone else.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fieldseal_core::{KeyType, SealError};
use fieldseal_crypto::wire::{
    BoundaryRequest, BoundaryResponse, ErrorBody, KeyRequest, KeyResponse, KEYS_PATH, OPEN_PATH,
    SEAL_PATH,
};
use fieldseal_crypto::{KeyManager, LocalBoundary, UserKey};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::metrics::ApiMetrics;

#[derive(Clone)]
pub struct AppState {
    pub keys: Arc<KeyManager>,
    /// bearer token -> user id
    pub tokens: Arc<BTreeMap<String, String>>,
    pub metrics: ApiMetrics,
}

impl AppState {
    pub fn new(keys: Arc<KeyManager>, tokens: BTreeMap<String, String>, metrics: ApiMetrics) -> Self {
        Self {
            keys,
            tokens: Arc::new(tokens),
            metrics,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route(KEYS_PATH, post(issue_key))
        .route(SEAL_PATH, post(seal))
        .route(OPEN_PATH, post(open))
        .with_state(state)
}

/// A [`SealError`] with the HTTP status it is reported under.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    err: SealError,
}

impl ApiError {
    fn forbidden(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::FORBIDDEN,
            err: SealError::Authentication(msg.into()),
        }
    }

    fn class(&self) -> &'static str {
        self.err.class()
    }
}

impl From<SealError> for ApiError {
    fn from(err: SealError) -> Self {
        Self {
            status: status_for(&err),
            err,
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        SealError::InvalidArgument(rejection.body_text()).into()
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody::from_error(&self.err))).into_response()
    }
}

pub fn status_for(err: &SealError) -> StatusCode {
    match err {
        SealError::Authentication(_) => StatusCode::UNAUTHORIZED,
        SealError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        SealError::Decryption(_) => StatusCode::UNPROCESSABLE_ENTITY,
        SealError::Storage(_) => StatusCode::SERVICE_UNAVAILABLE,
        SealError::Transport(_) => StatusCode::BAD_GATEWAY,
        SealError::Configuration(_)
        | SealError::Encryption(_)
        | SealError::Io(_)
        | SealError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Resolve the bearer token and check it belongs to `user_id`.
fn authorize(state: &AppState, headers: &HeaderMap, user_id: &str) -> Result<(), ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| SealError::Authentication("missing bearer credential".into()))?;

    let caller = state
        .tokens
        .get(token)
        .ok_or_else(|| SealError::Authentication("unknown bearer credential".into()))?;

    if user_id.is_empty() {
        return Err(SealError::InvalidArgument("userId must not be empty".into()).into());
    }
    if caller != user_id {
        warn!(caller = %caller, requested = %user_id, "key request for another user refused");
        return Err(ApiError::forbidden("caller identity does not match userId"));
    }
    Ok(())
}

async fn issue_key(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<KeyRequest>, JsonRejection>,
) -> Response {
    let key_type = payload
        .as_ref()
        .map(|Json(req)| req.key_type.as_str())
        .unwrap_or("invalid");
    let result = issue_key_inner(&state, &headers, payload).await;
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.class(),
    };
    state.metrics.key_request(key_type, outcome);
    match result {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn issue_key_inner(
    state: &AppState,
    headers: &HeaderMap,
    payload: Result<Json<KeyRequest>, JsonRejection>,
) -> Result<KeyResponse, ApiError> {
    let Json(req) = payload?;
    authorize(state, headers, &req.user_id)?;

    if req.key_type == KeyType::Legacy && !state.keys.legacy_enabled() {
        return Err(SealError::InvalidArgument("legacy key scheme is disabled".into()).into());
    }

    let key = state.keys.key_for(&req.user_id, req.key_type).await?;
    debug!(user_id = %req.user_id, key_type = %req.key_type, "key issued");
    Ok(KeyResponse {
        encryption_key: key.to_hex(),
    })
}

#[derive(Clone, Copy)]
enum Op {
    Seal,
    Open,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Seal => "seal",
            Op::Open => "open",
        }
    }
}

async fn seal(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BoundaryRequest>, JsonRejection>,
) -> Response {
    boundary(&state, &headers, payload, Op::Seal)
}

async fn open(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<BoundaryRequest>, JsonRejection>,
) -> Response {
    boundary(&state, &headers, payload, Op::Open)
}

fn boundary(
    state: &AppState,
    headers: &HeaderMap,
    payload: Result<Json<BoundaryRequest>, JsonRejection>,
    op: Op,
) -> Response {
    let result = boundary_inner(state, headers, payload, op);
    let outcome = match &result {
        Ok(_) => "ok",
        Err(e) => e.class(),
    };
    state.metrics.boundary_call(op.as_str(), outcome);
    match result {
        Ok(resp) => Json(resp).into_response(),
        Err(e) => e.into_response(),
    }
}

fn boundary_inner(
    state: &AppState,
    headers: &HeaderMap,
    payload: Result<Json<BoundaryRequest>, JsonRejection>,
    op: Op,
) -> Result<BoundaryResponse, ApiError> {
    let Json(req) = payload?;
    authorize(state, headers, &req.user_id)?;

    let key = UserKey::from_hex(&req.key)?;
    let data = STANDARD
        .decode(req.data.as_bytes())
        .map_err(|e| SealError::InvalidArgument(format!("data is not valid base64: {e}")))?;

    let out = match op {
        Op::Seal => LocalBoundary.seal_sync(&key, &data)?,
        Op::Open => LocalBoundary.open_sync(&key, &data)?,
    };
    Ok(BoundaryResponse {
        data: STANDARD.encode(out),
    })
}
