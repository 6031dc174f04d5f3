//! Primary backend: authenticated encryption executed by the trusted boundary.
//!
//! primary payload (binary):
//! ```text
//! [24 bytes: random nonce][N bytes: ciphertext][16 bytes: Poly1305 tag]
//! ```
//!
//! In the trusted context the boundary runs in-process ([`LocalBoundary`]).
//! In an untrusted context the same operation is requested from `fieldsealed`
//! over HTTP ([`HttpBoundary`]); the payload format is identical either way.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use fieldseal_core::{EnvelopeFormat, SealError, SealResult};
use rand::RngCore;
use std::sync::Arc;

use crate::backend::CipherBackend;
use crate::client::BoundaryClient;
use crate::keys::UserKey;
use crate::wire::{BoundaryRequest, BoundaryResponse, OPEN_PATH, SEAL_PATH};
use crate::{TAG_SIZE, XNONCE_SIZE};

/// In-process boundary for trusted contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalBoundary;

impl LocalBoundary {
    pub fn new() -> Self {
        Self
    }

    pub fn seal_sync(&self, key: &UserKey, plaintext: &[u8]) -> SealResult<Vec<u8>> {
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

        let mut nonce_bytes = [0u8; XNONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| SealError::Encryption(format!("primary encryption failed: {e}")))?;

        let mut result = Vec::with_capacity(XNONCE_SIZE + ciphertext.len());
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);
        Ok(result)
    }

    pub fn open_sync(&self, key: &UserKey, payload: &[u8]) -> SealResult<Vec<u8>> {
        if payload.len() < XNONCE_SIZE + TAG_SIZE {
            return Err(SealError::Decryption(format!(
                "primary payload too short: {} bytes (minimum {})",
                payload.len(),
                XNONCE_SIZE + TAG_SIZE
            )));
        }

        let (nonce_bytes, ciphertext) = payload.split_at(XNONCE_SIZE);
        let nonce = XNonce::from_slice(nonce_bytes);
        let cipher = XChaCha20Poly1305::new(key.as_bytes().into());

        cipher.decrypt(nonce, ciphertext).map_err(|_| {
            SealError::Decryption("primary decryption failed: wrong key or corrupted data".into())
        })
    }
}

#[async_trait]
impl CipherBackend for LocalBoundary {
    fn format(&self) -> EnvelopeFormat {
        EnvelopeFormat::Primary
    }

    async fn seal(&self, _user_id: &str, key: &UserKey, plaintext: &[u8]) -> SealResult<Vec<u8>> {
        self.seal_sync(key, plaintext)
    }

    async fn open(&self, _user_id: &str, key: &UserKey, payload: &[u8]) -> SealResult<Vec<u8>> {
        self.open_sync(key, payload)
    }
}

/// Remote boundary reached through `fieldsealed`.
///
/// The daemon rejects a request whose `user_id` differs from the identity
/// behind the bearer credential.
pub struct HttpBoundary {
    client: Arc<BoundaryClient>,
}

impl HttpBoundary {
    pub fn new(client: Arc<BoundaryClient>) -> Self {
        Self { client }
    }

    async fn call(
        &self,
        path: &str,
        user_id: &str,
        key: &UserKey,
        data: &[u8],
    ) -> SealResult<Vec<u8>> {
        let request = BoundaryRequest {
            user_id: user_id.to_string(),
            key: key.to_hex(),
            data: STANDARD.encode(data),
        };
        let response: BoundaryResponse = self.client.post_json(path, &request).await?;
        STANDARD
            .decode(response.data.as_bytes())
            .map_err(|e| SealError::Transport(format!("boundary returned invalid base64: {e}")))
    }
}

#[async_trait]
impl CipherBackend for HttpBoundary {
    fn format(&self) -> EnvelopeFormat {
        EnvelopeFormat::Primary
    }

    async fn seal(&self, user_id: &str, key: &UserKey, plaintext: &[u8]) -> SealResult<Vec<u8>> {
        self.call(SEAL_PATH, user_id, key, plaintext).await
    }

    async fn open(&self, user_id: &str, key: &UserKey, payload: &[u8]) -> SealResult<Vec<u8>> {
        self.call(OPEN_PATH, user_id, key, payload).await
    }
}
