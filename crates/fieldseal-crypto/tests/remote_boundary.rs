//! Untrusted-context paths against an in-process HTTP boundary.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
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
use fieldseal_crypto::{
    derive_user_key, BoundaryClient, EncryptionEngine, HttpBoundary, KeyManager, KeySource,
    LocalAeadBackend, LocalBoundary, RemoteKeySource, UserKey,
};
use secrecy::SecretString;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

const TOKEN: &str = "token-user-1";
const SECRET: &str = "remote-boundary-secret-remote-boundary";

#[derive(Clone, Default)]
struct Boundary {
    calls: Arc<AtomicUsize>,
    /// Number of leading calls answered with 503
    flaky: usize,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(|v| v == format!("Bearer {TOKEN}"))
        .unwrap_or(false)
}

fn error(status: StatusCode, err: SealError) -> Response {
    (status, Json(ErrorBody::from_error(&err))).into_response()
}

fn gate(state: &Boundary, headers: &HeaderMap, user_id: &str) -> Option<Response> {
    let n = state.calls.fetch_add(1, Ordering::SeqCst);
    if n < state.flaky {
        return Some(StatusCode::SERVICE_UNAVAILABLE.into_response());
    }
    if !authorized(headers) {
        return Some(error(
            StatusCode::UNAUTHORIZED,
            SealError::Authentication("bad token".into()),
        ));
    }
    if user_id != "user-1" {
        return Some(error(
            StatusCode::FORBIDDEN,
            SealError::Authentication("identity mismatch".into()),
        ));
    }
    None
}

async fn issue_key(
    State(state): State<Boundary>,
    headers: HeaderMap,
    Json(req): Json<KeyRequest>,
) -> Response {
    if let Some(rejection) = gate(&state, &headers, &req.user_id) {
        return rejection;
    }
    let key = derive_user_key(&SecretString::from(SECRET), &req.user_id, req.key_type).unwrap();
    Json(KeyResponse {
        encryption_key: key.to_hex(),
    })
    .into_response()
}

async fn seal(
    State(state): State<Boundary>,
    headers: HeaderMap,
    Json(req): Json<BoundaryRequest>,
) -> Response {
    if let Some(rejection) = gate(&state, &headers, &req.user_id) {
        return rejection;
    }
    let key = UserKey::from_hex(&req.key).unwrap();
    let data = STANDARD.decode(&req.data).unwrap();
    let sealed = LocalBoundary.seal_sync(&key, &data).unwrap();
    Json(BoundaryResponse {
        data: STANDARD.encode(sealed),
    })
    .into_response()
}

async fn open(
    State(state): State<Boundary>,
    headers: HeaderMap,
    Json(req): Json<BoundaryRequest>,
) -> Response {
    if let Some(rejection) = gate(&state, &headers, &req.user_id) {
        return rejection;
    }
    let key = UserKey::from_hex(&req.key).unwrap();
    let data = STANDARD.decode(&req.data).unwrap();
    match LocalBoundary.open_sync(&key, &data) {
        Ok(plain) => Json(BoundaryResponse {
            data: STANDARD.encode(plain),
        })
        .into_response(),
        Err(e) => error(StatusCode::UNPROCESSABLE_ENTITY, e),
    }
}

async fn spawn(state: Boundary) -> String {
    let app = Router::new()
        .route(KEYS_PATH, post(issue_key))
        .route(SEAL_PATH, post(seal))
        .route(OPEN_PATH, post(open))
        .with_state(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn client(base: &str, token: Option<&str>, attempts: u32) -> Arc<BoundaryClient> {
    Arc::new(
        BoundaryClient::new(
            base,
            token.map(SecretString::from),
            Duration::from_secs(5),
            attempts,
            Duration::from_millis(5),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn remote_key_matches_local_derivation() {
    let base = spawn(Boundary::default()).await;
    let source = RemoteKeySource::new(client(&base, Some(TOKEN), 1));

    for key_type in KeyType::DECRYPT_ORDER {
        let remote = source.fetch("user-1", key_type).await.unwrap();
        let local = derive_user_key(&SecretString::from(SECRET), "user-1", key_type).unwrap();
        assert_eq!(remote.as_bytes(), local.as_bytes());
    }
}

#[tokio::test]
async fn wrong_token_is_authentication_error_and_not_retried() {
    let state = Boundary::default();
    let base = spawn(state.clone()).await;
    let source = RemoteKeySource::new(client(&base, Some("stolen"), 3));

    let err = source.fetch("user-1", KeyType::Primary).await.unwrap_err();
    assert!(matches!(err, SealError::Authentication(_)), "got {err:?}");
    assert_eq!(state.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn identity_mismatch_is_authentication_error() {
    let base = spawn(Boundary::default()).await;
    let source = RemoteKeySource::new(client(&base, Some(TOKEN), 1));
    let err = source.fetch("user-2", KeyType::Primary).await.unwrap_err();
    assert!(matches!(err, SealError::Authentication(_)));
}

#[tokio::test]
async fn transient_failures_are_retried_with_bound() {
    let state = Boundary {
        flaky: 2,
        ..Boundary::default()
    };
    let base = spawn(state.clone()).await;

    let source = RemoteKeySource::new(client(&base, Some(TOKEN), 3));
    source.fetch("user-1", KeyType::Primary).await.unwrap();
    assert_eq!(state.calls.load(Ordering::SeqCst), 3);

    let state = Boundary {
        flaky: 10,
        ..Boundary::default()
    };
    let base = spawn(state.clone()).await;
    let source = RemoteKeySource::new(client(&base, Some(TOKEN), 2));
    let err = source.fetch("user-1", KeyType::Primary).await.unwrap_err();
    assert!(matches!(err, SealError::Transport(_)));
    assert_eq!(state.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn untrusted_engine_roundtrip_through_boundary() {
    let base = spawn(Boundary::default()).await;
    let client = client(&base, Some(TOKEN), 1);
    let keys = KeyManager::new(Arc::new(RemoteKeySource::new(client.clone())));
    let engine = EncryptionEngine::new(
        Arc::new(keys),
        Arc::new(HttpBoundary::new(client)),
        Arc::new(LocalAeadBackend::new()),
    )
    .unwrap();

    let field = engine.encrypt_field("Q4 Release", "user-1").await.unwrap();
    assert!(field.encrypted.starts_with("primary:"));
    assert_eq!(
        engine.decrypt_str(&field.encrypted, "user-1").await.unwrap(),
        "Q4 Release"
    );

    // Payloads sealed remotely open locally under the same derived key.
    let value = fieldseal_crypto::decode_envelope(&field.encrypted).unwrap();
    let key = derive_user_key(&SecretString::from(SECRET), "user-1", KeyType::Primary).unwrap();
    assert_eq!(
        LocalBoundary.open_sync(&key, &value.payload).unwrap(),
        b"Q4 Release"
    );
}

#[tokio::test]
async fn unreachable_boundary_falls_back_for_writes() {
    // Keys come from a live boundary; the primary backend points at a dead port.
    let base = spawn(Boundary::default()).await;
    let keys = KeyManager::new(Arc::new(RemoteKeySource::new(client(&base, Some(TOKEN), 1))));
    let dead = client("http://127.0.0.1:9", Some(TOKEN), 1);
    let engine = EncryptionEngine::new(
        Arc::new(keys),
        Arc::new(HttpBoundary::new(dead)),
        Arc::new(LocalAeadBackend::new()),
    )
    .unwrap();

    let field = engine.encrypt_field("Task A", "user-1").await.unwrap();
    assert!(field.encrypted.starts_with("fallback-v1:"));
    assert_eq!(
        engine.decrypt_str(&field.encrypted, "user-1").await.unwrap(),
        "Task A"
    );
}
