//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  - Prometheus text format
//!   GET /healthz  - Liveness probe (always 200 if process is running)
//!   GET /readyz   - Readiness probe (200 if storage is reachable and key material is usable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus_client::{
    encoding::text::encode,
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};
use std::sync::Arc;

/// Counters for the key issuance boundary
#[derive(Clone, Default)]
pub struct ApiMetrics {
    key_requests: Family<Vec<(String, String)>, Counter>,
    boundary_calls: Family<Vec<(String, String)>, Counter>,
}

impl ApiMetrics {
    pub fn new(registry: &mut Registry) -> Self {
        let metrics = Self::default();
        registry.register(
            "fieldseal_key_requests",
            "Key issuance requests by key type and outcome",
            metrics.key_requests.clone(),
        );
        registry.register(
            "fieldseal_boundary_calls",
            "Primary-backend seal/open calls by operation and outcome",
            metrics.boundary_calls.clone(),
        );
        metrics
    }

    pub fn key_request(&self, key_type: &str, outcome: &str) {
        self.key_requests
            .get_or_create(&vec![
                ("key_type".to_string(), key_type.to_string()),
                ("outcome".to_string(), outcome.to_string()),
            ])
            .inc();
    }

    pub fn boundary_call(&self, op: &str, outcome: &str) {
        self.boundary_calls
            .get_or_create(&vec![
                ("op".to_string(), op.to_string()),
                ("outcome".to_string(), outcome.to_string()),
            ])
            .inc();
    }
}

/// Shared health state updated by the daemon
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub operator: opendal::Operator,
    /// Whether the trusted secret passed validation at startup
    pub secret_ok: bool,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve Prometheus metrics and health endpoints on `addr` (e.g. "127.0.0.1:9100")
pub async fn serve(addr: String, state: HealthState) -> Result<()> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, app)
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: 503 until both storage and key material are usable.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    if !state.secret_ok {
        return (StatusCode::SERVICE_UNAVAILABLE, "key material not configured");
    }
    match fieldseal_storage::check_health(&state.operator).await {
        Ok(()) => (StatusCode::OK, "ready"),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "storage unreachable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn state(secret_ok: bool) -> (HealthState, ApiMetrics) {
        let mut registry = Registry::default();
        let metrics = ApiMetrics::new(&mut registry);
        let state = HealthState {
            registry: Arc::new(registry),
            operator: fieldseal_storage::build_memory_operator().unwrap(),
            secret_ok,
        };
        (state, metrics)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, String) {
        let resp = app
            .oneshot(Request::get(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_ready_with_memory_storage() {
        let (state, _) = state(true);
        let (status, body) = get(router(state), "/readyz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ready");
    }

    #[tokio::test]
    async fn test_not_ready_without_secret() {
        let (state, _) = state(false);
        let (status, _) = get(router(state.clone()), "/readyz").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let (status, _) = get(router(state), "/healthz").await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_exposes_counters() {
        let (state, metrics) = state(true);
        metrics.key_request("primary", "ok");
        metrics.key_request("primary", "ok");
        metrics.boundary_call("open", "decryption_error");

        let (status, body) = get(router(state), "/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains(r#"fieldseal_key_requests_total{key_type="primary",outcome="ok"} 2"#));
        assert!(body
            .contains(r#"fieldseal_boundary_calls_total{op="open",outcome="decryption_error"} 1"#));
    }
}
