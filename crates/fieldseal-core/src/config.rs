use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::types::ExecutionContext;

/// Top-level configuration (loaded from fieldseal.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldsealConfig {
    pub daemon: DaemonConfig,
    pub keys: KeysConfig,
    pub storage: StorageConfig,
    pub migration: MigrationConfig,
    pub auth: AuthConfig,
}

impl FieldsealConfig {
    /// Load from `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Listen address for the key issuance boundary
    pub listen: String,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9100)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

/// Key derivation and key issuance settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeysConfig {
    /// "trusted" derives locally, "untrusted" asks the issuance boundary
    pub context: ExecutionContext,
    /// Environment variable holding the trusted secret
    pub secret_env: String,
    /// Minimum secret length in characters
    pub min_secret_len: usize,
    /// Base URL of the trusted boundary (untrusted context only)
    pub boundary_url: String,
    /// Environment variable holding the caller's bearer credential
    pub bearer_token_env: String,
    /// Per-request timeout for boundary calls
    pub request_timeout_secs: u64,
    /// Attempts per boundary call on transient failure
    pub max_attempts: u32,
    /// Initial backoff between attempts, doubled each retry
    pub backoff_ms: u64,
    /// Allow the weakened placeholder scheme for reading very old rows
    pub enable_legacy_scheme: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend: "fs", "memory", or "s3"
    pub backend: String,
    /// Root directory (fs) or key prefix (s3)
    pub root: PathBuf,
    /// S3 endpoint
    pub endpoint: String,
    /// S3 region (default: us-east-1)
    pub region: String,
    /// S3 bucket
    pub bucket: String,
    /// Enforce HTTPS for S3 connections
    pub enforce_tls: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    /// Records per batch (default: 100)
    pub batch_size: usize,
    /// Records sampled by validate mode (default: 100)
    pub validate_sample: usize,
    /// Resume checkpoint location
    pub checkpoint_file: PathBuf,
}

/// Bearer tokens accepted by the issuance boundary, mapped to the user id they authenticate.
///
/// Stands in for the external session system.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub tokens: BTreeMap<String, String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8787".into(),
            metrics_addr: Some("127.0.0.1:9100".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for KeysConfig {
    fn default() -> Self {
        Self {
            context: ExecutionContext::Trusted,
            secret_env: "KEY_MATERIAL".into(),
            min_secret_len: crate::MIN_SECRET_LEN,
            boundary_url: "http://127.0.0.1:8787".into(),
            bearer_token_env: "FIELDSEAL_TOKEN".into(),
            request_timeout_secs: 10,
            max_attempts: 3,
            backoff_ms: 200,
            enable_legacy_scheme: true,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: "fs".into(),
            root: PathBuf::from("~/.local/share/fieldseal/records"),
            endpoint: "http://localhost:8333".into(),
            region: "us-east-1".into(),
            bucket: "fieldseal".into(),
            enforce_tls: false,
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            validate_sample: 100,
            checkpoint_file: PathBuf::from("~/.local/share/fieldseal/migration.json"),
        }
    }
}

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
