//! In-memory user key cache with single-flight derivation.
//!
//! Entries are keyed by `(user_id, KeyType)`. Concurrent lookups for a cached
//! key only take the read lock; on a miss, one caller derives while the others
//! wait on the same slot. A failed derivation removes the slot so the next
//! call retries and unknown ids do not accumulate.

use fieldseal_core::{KeyType, SealResult};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};

use crate::keys::UserKey;

type Slot = Arc<OnceCell<UserKey>>;

/// Process-memory key cache. Owned by a [`crate::KeyManager`]; never persisted.
#[derive(Default)]
pub struct KeyCache {
    slots: RwLock<HashMap<(String, KeyType), Slot>>,
}

impl KeyCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached key, or run `derive` once and cache its result.
    pub async fn get_or_try_insert<F, Fut>(
        &self,
        user_id: &str,
        key_type: KeyType,
        derive: F,
    ) -> SealResult<UserKey>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = SealResult<UserKey>>,
    {
        let slot = self.slot(user_id, key_type).await;
        match slot.get_or_try_init(derive).await {
            Ok(key) => Ok(key.clone()),
            Err(e) => {
                self.evict_empty(user_id, key_type, &slot).await;
                Err(e)
            }
        }
    }

    /// Cached key without deriving.
    pub async fn get(&self, user_id: &str, key_type: KeyType) -> Option<UserKey> {
        let slots = self.slots.read().await;
        slots
            .get(&(user_id.to_string(), key_type))
            .and_then(|slot| slot.get().cloned())
    }

    /// Drop every key of one user (sign-out).
    pub async fn clear(&self, user_id: &str) {
        let mut slots = self.slots.write().await;
        slots.retain(|(uid, _), _| uid != user_id);
        tracing::debug!(user_id = %user_id, "key cache: cleared user");
    }

    /// Drop every cached key.
    pub async fn clear_all(&self) {
        self.slots.write().await.clear();
        tracing::debug!("key cache: cleared all");
    }

    /// Number of derived (initialized) keys currently held.
    pub async fn len(&self) -> usize {
        let slots = self.slots.read().await;
        slots.values().filter(|slot| slot.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn slot(&self, user_id: &str, key_type: KeyType) -> Slot {
        let id = (user_id.to_string(), key_type);
        if let Some(slot) = self.slots.read().await.get(&id) {
            return slot.clone();
        }
        let mut slots = self.slots.write().await;
        slots.entry(id).or_default().clone()
    }

    /// Remove `slot` if it is still the mapped one and nothing filled it.
    async fn evict_empty(&self, user_id: &str, key_type: KeyType, slot: &Slot) {
        let id = (user_id.to_string(), key_type);
        let mut slots = self.slots.write().await;
        let stale = slots
            .get(&id)
            .is_some_and(|current| Arc::ptr_eq(current, slot) && !current.initialized());
        if stale {
            slots.remove(&id);
        }
    }
}
