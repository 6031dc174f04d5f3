//! KeyManager: user key lookup through an injected source and cache

use fieldseal_core::{KeyType, SealError, SealResult};
use std::sync::Arc;
use tracing::debug;

use crate::cache::KeyCache;
use crate::keys::UserKey;
use crate::source::KeySource;

pub struct KeyManager {
    source: Arc<dyn KeySource>,
    cache: KeyCache,
    legacy_enabled: bool,
}

impl KeyManager {
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self {
            source,
            cache: KeyCache::new(),
            legacy_enabled: true,
        }
    }

    /// Allow or refuse the weakened placeholder scheme.
    pub fn with_legacy_scheme(mut self, enabled: bool) -> Self {
        self.legacy_enabled = enabled;
        self
    }

    /// The current (primary-scheme) key for `user_id`.
    pub async fn get_user_key(&self, user_id: &str) -> SealResult<UserKey> {
        self.key_for(user_id, KeyType::Primary).await
    }

    /// The key for a specific derivation scheme, cached per `(user_id, key_type)`.
    pub async fn key_for(&self, user_id: &str, key_type: KeyType) -> SealResult<UserKey> {
        if user_id.is_empty() {
            return Err(SealError::InvalidArgument("user id must not be empty".into()));
        }
        if key_type == KeyType::Legacy && !self.legacy_enabled {
            return Err(SealError::Configuration(
                "legacy key scheme is disabled".into(),
            ));
        }
        self.cache
            .get_or_try_insert(user_id, key_type, || async {
                debug!(
                    user_id = %user_id,
                    key_type = %key_type,
                    source = self.source.describe(),
                    "deriving user key"
                );
                self.source.fetch(user_id, key_type).await
            })
            .await
    }

    /// Schemes to try, in order, when a primary envelope fails to open.
    pub fn decrypt_schemes(&self) -> impl Iterator<Item = KeyType> + '_ {
        KeyType::DECRYPT_ORDER
            .into_iter()
            .filter(move |k| *k != KeyType::Legacy || self.legacy_enabled)
    }

    pub fn legacy_enabled(&self) -> bool {
        self.legacy_enabled
    }

    /// Forget one user's keys (sign-out).
    pub async fn clear(&self, user_id: &str) {
        self.cache.clear(user_id).await;
    }

    pub async fn clear_all(&self) {
        self.cache.clear_all().await;
    }

    pub fn cache(&self) -> &KeyCache {
        &self.cache
    }
}
