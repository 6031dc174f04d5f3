//! Daemon lifecycle: startup, health checks, HTTP servers, shutdown

use anyhow::{Context, Result};
use fieldseal_core::config::FieldsealConfig;
use fieldseal_crypto::{KeyManager, LocalKeySource};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::api::{build_router, AppState};
use crate::metrics::{ApiMetrics, HealthState};

pub async fn run(config: FieldsealConfig) -> Result<()> {
    info!("daemon starting");

    // Key material
    let source = LocalKeySource::from_env(&config.keys.secret_env, config.keys.min_secret_len);
    let secret_ok = match source.secret() {
        Ok(_) => {
            info!(var = %config.keys.secret_env, "key material loaded");
            true
        }
        Err(e) => {
            warn!("{e}  (key requests will fail with configuration_error)");
            false
        }
    };
    if config.keys.enable_legacy_scheme {
        warn!("legacy key scheme enabled; rows written under it are readable with a public placeholder");
    }
    let keys = Arc::new(
        KeyManager::new(Arc::new(source)).with_legacy_scheme(config.keys.enable_legacy_scheme),
    );

    // Storage operator, used for readiness only
    let operator = fieldseal_storage::build_from_config(&config.storage)?;
    match fieldseal_storage::check_health(&operator).await {
        Ok(()) => info!(backend = %config.storage.backend, "storage: connected"),
        Err(e) => warn!(backend = %config.storage.backend, "storage: {e}"),
    }

    if config.auth.tokens.is_empty() {
        warn!("no bearer tokens configured; every key request will be refused");
    }

    let mut registry = Registry::default();
    let metrics = ApiMetrics::new(&mut registry);
    let registry = Arc::new(registry);

    // Start Prometheus metrics endpoint
    if let Some(addr) = config.daemon.metrics_addr.clone() {
        let health = HealthState {
            registry: registry.clone(),
            operator: operator.clone(),
            secret_ok,
        };
        tokio::spawn(async move {
            if let Err(e) = crate::metrics::serve(addr, health).await {
                error!("metrics server failed: {e}");
            }
        });
    }

    let state = AppState::new(keys, config.auth.tokens.clone(), metrics);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.daemon.listen)
        .await
        .with_context(|| format!("binding {}", config.daemon.listen))?;
    info!(addr = %config.daemon.listen, "key boundary: listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("key boundary server")?;

    info!("daemon stopped");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            warn!("registering SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received, shutting down"),
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
    }
}
