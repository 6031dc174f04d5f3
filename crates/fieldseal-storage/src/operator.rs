//! OpenDAL Operator factory for record storage backends

use anyhow::{Context, Result};
use fieldseal_core::config::{expand_tilde, StorageConfig};
use opendal::Operator;

/// Connection details for an S3-compatible bucket
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: String,
    pub region: String,
    pub bucket: String,
    pub access_key_id: String,
    pub secret_access_key: String,
}

fn with_layers(op: Operator) -> Operator {
    op.layer(opendal::layers::LoggingLayer::default())
        .layer(
            opendal::layers::RetryLayer::new()
                .with_max_times(5)
                .with_jitter(),
        )
}

/// Build an Operator for any S3-compatible endpoint (path-style addressing).
pub fn build_s3_operator(cfg: &S3Config) -> Result<Operator> {
    let builder = opendal::services::S3::default()
        .endpoint(&cfg.endpoint)
        .region(&cfg.region)
        .bucket(&cfg.bucket)
        .access_key_id(&cfg.access_key_id)
        .secret_access_key(&cfg.secret_access_key);

    let op = Operator::new(builder)
        .context("creating OpenDAL S3 operator")?
        .finish();
    Ok(with_layers(op))
}

pub fn build_fs_operator(root: &str) -> Result<Operator> {
    let builder = opendal::services::Fs::default().root(root);
    let op = Operator::new(builder)
        .with_context(|| format!("creating OpenDAL fs operator at {root}"))?
        .finish();
    Ok(with_layers(op))
}

/// Process-local store, lost on exit. Tests and dry runs.
pub fn build_memory_operator() -> Result<Operator> {
    let op = Operator::new(opendal::services::Memory::default())
        .context("creating OpenDAL memory operator")?
        .finish();
    Ok(with_layers(op))
}

/// Build the operator selected by `[storage] backend`.
///
/// For `s3`, credentials come from `AWS_ACCESS_KEY_ID` / `AWS_SECRET_ACCESS_KEY`.
/// If `enforce_tls` is true and the endpoint uses HTTP, this returns an error.
/// Otherwise, a warning is logged for non-HTTPS endpoints.
pub fn build_from_config(storage: &StorageConfig) -> Result<Operator> {
    match storage.backend.as_str() {
        "memory" => build_memory_operator(),
        "fs" => {
            let root = expand_tilde(&storage.root);
            std::fs::create_dir_all(&root)
                .with_context(|| format!("creating storage root {}", root.display()))?;
            build_fs_operator(&root.to_string_lossy())
        }
        "s3" => {
            check_endpoint_tls(storage)?;
            let access_key_id = std::env::var("AWS_ACCESS_KEY_ID")
                .context("S3 credentials not set: export AWS_ACCESS_KEY_ID")?;
            let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY")
                .context("S3 credentials not set: export AWS_SECRET_ACCESS_KEY")?;
            build_s3_operator(&S3Config {
                endpoint: storage.endpoint.clone(),
                region: storage.region.clone(),
                bucket: storage.bucket.clone(),
                access_key_id,
                secret_access_key,
            })
        }
        other => anyhow::bail!("unknown storage backend {other:?} (expected fs, memory, or s3)"),
    }
}

fn check_endpoint_tls(storage: &StorageConfig) -> Result<()> {
    if storage.endpoint.starts_with("http://") {
        if storage.enforce_tls {
            anyhow::bail!(
                "S3 endpoint uses plaintext HTTP ({}), but enforce_tls is enabled. \
                 Use an HTTPS endpoint or set storage.enforce_tls = false for local development.",
                storage.endpoint
            );
        }
        tracing::warn!(
            endpoint = %storage.endpoint,
            "S3 endpoint uses plaintext HTTP; credentials and ciphertext are sent unencrypted"
        );
    }
    Ok(())
}
