//! Where user keys come from: local derivation or the issuance boundary

use async_trait::async_trait;
use fieldseal_core::{KeyType, SealError, SealResult};
use secrecy::SecretString;
use std::sync::Arc;

use crate::client::BoundaryClient;
use crate::keys::{derive_user_key, validate_secret, UserKey};
use crate::wire::{KeyRequest, KeyResponse, KEYS_PATH};

/// Produces the user key for one derivation scheme.
#[async_trait]
pub trait KeySource: Send + Sync {
    async fn fetch(&self, user_id: &str, key_type: KeyType) -> SealResult<UserKey>;

    /// Short label for logs.
    fn describe(&self) -> &'static str;
}

/// Trusted-context source: holds `KEY_MATERIAL` and derives directly.
///
/// An absent or short secret is not rejected at construction; every `fetch`
/// fails with a configuration error instead, so a daemon can still start and
/// answer requests with a distinct error class.
pub struct LocalKeySource {
    secret: Option<SecretString>,
    min_len: usize,
}

impl LocalKeySource {
    pub fn new(secret: Option<SecretString>, min_len: usize) -> Self {
        Self { secret, min_len }
    }

    /// Read the secret from environment variable `var`.
    pub fn from_env(var: &str, min_len: usize) -> Self {
        let secret = std::env::var(var)
            .ok()
            .filter(|s| !s.is_empty())
            .map(SecretString::from);
        if secret.is_none() {
            tracing::warn!(var = %var, "trusted secret not set; key derivation will fail");
        }
        Self::new(secret, min_len)
    }

    /// The validated secret, or the configuration error every fetch would hit.
    pub fn secret(&self) -> SealResult<&SecretString> {
        let secret = self
            .secret
            .as_ref()
            .ok_or_else(|| SealError::Configuration("trusted secret is not configured".into()))?;
        validate_secret(secret, self.min_len)?;
        Ok(secret)
    }
}

#[async_trait]
impl KeySource for LocalKeySource {
    async fn fetch(&self, user_id: &str, key_type: KeyType) -> SealResult<UserKey> {
        let secret = self.secret()?;
        derive_user_key(secret, user_id, key_type)
    }

    fn describe(&self) -> &'static str {
        "local"
    }
}

/// Untrusted-context source: asks the issuance boundary for key material.
pub struct RemoteKeySource {
    client: Arc<BoundaryClient>,
}

impl RemoteKeySource {
    pub fn new(client: Arc<BoundaryClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl KeySource for RemoteKeySource {
    async fn fetch(&self, user_id: &str, key_type: KeyType) -> SealResult<UserKey> {
        let request = KeyRequest {
            user_id: user_id.to_string(),
            key_type,
        };
        let response: KeyResponse = self.client.post_json(KEYS_PATH, &request).await?;
        UserKey::from_hex(&response.encryption_key).map_err(|e| {
            SealError::Transport(format!("boundary returned malformed key material: {e}"))
        })
    }

    fn describe(&self) -> &'static str {
        "remote"
    }
}
