//! Encryption backends, one per envelope format.
//!
//! fallback-v1 payload (binary):
//! ```text
//! [12 bytes: random nonce][N bytes: ciphertext][16 bytes: GCM tag]
//! ```

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use async_trait::async_trait;
use fieldseal_core::{EnvelopeFormat, SealError, SealResult};
use rand::RngCore;

use crate::keys::UserKey;
use crate::{GCM_NONCE_SIZE, TAG_SIZE};

/// One way of turning plaintext into an authenticated payload and back.
///
/// `open` must fail with [`SealError::Decryption`] on any authentication
/// failure; other error classes mean the backend itself was unreachable.
#[async_trait]
pub trait CipherBackend: Send + Sync {
    /// Envelope tag this backend writes and reads.
    fn format(&self) -> EnvelopeFormat;

    /// `user_id` identifies the caller to remote backends; local ones ignore it.
    async fn seal(&self, user_id: &str, key: &UserKey, plaintext: &[u8]) -> SealResult<Vec<u8>>;

    async fn open(&self, user_id: &str, key: &UserKey, payload: &[u8]) -> SealResult<Vec<u8>>;
}

/// Local AES-256-GCM, available anywhere the process runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalAeadBackend;

impl LocalAeadBackend {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CipherBackend for LocalAeadBackend {
    fn format(&self) -> EnvelopeFormat {
        EnvelopeFormat::FallbackV1
    }

    async fn seal(&self, _user_id: &str, key: &UserKey, plaintext: &[u8]) -> SealResult<Vec<u8>> {
        seal_gcm(key, plaintext)
    }

    async fn open(&self, _user_id: &str, key: &UserKey, payload: &[u8]) -> SealResult<Vec<u8>> {
        open_gcm(key, payload)
    }
}

/// Returns `[12-byte nonce][ciphertext][16-byte tag]`.
pub fn seal_gcm(key: &UserKey, plaintext: &[u8]) -> SealResult<Vec<u8>> {
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    let mut nonce_bytes = [0u8; GCM_NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|e| SealError::Encryption(format!("fallback-v1 encryption failed: {e}")))?;

    let mut result = Vec::with_capacity(GCM_NONCE_SIZE + ciphertext.len());
    result.extend_from_slice(&nonce_bytes);
    result.extend_from_slice(&ciphertext);
    Ok(result)
}

/// Input: output of [`seal_gcm`].
pub fn open_gcm(key: &UserKey, payload: &[u8]) -> SealResult<Vec<u8>> {
    if payload.len() < GCM_NONCE_SIZE + TAG_SIZE {
        return Err(SealError::Decryption(format!(
            "fallback-v1 payload too short: {} bytes (minimum {})",
            payload.len(),
            GCM_NONCE_SIZE + TAG_SIZE
        )));
    }

    let (nonce_bytes, ciphertext) = payload.split_at(GCM_NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);
    let cipher = Aes256Gcm::new(key.as_bytes().into());

    cipher.decrypt(nonce, ciphertext).map_err(|_| {
        SealError::Decryption("fallback-v1 decryption failed: wrong key or corrupted data".into())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn key(byte: u8) -> UserKey {
        UserKey::from_bytes([byte; KEY_SIZE])
    }

    #[test]
    fn test_gcm_roundtrip() {
        let k = key(1);
        let sealed = seal_gcm(&k, b"Q4 Release").unwrap();
        assert_eq!(open_gcm(&k, &sealed).unwrap(), b"Q4 Release");
    }

    #[test]
    fn test_gcm_payload_layout() {
        let sealed = seal_gcm(&key(1), &[0u8; 100]).unwrap();
        // nonce (12) + plaintext (100) + tag (16)
        assert_eq!(sealed.len(), GCM_NONCE_SIZE + 100 + TAG_SIZE);
    }

    #[test]
    fn test_gcm_fresh_nonce_per_call() {
        let k = key(1);
        let a = seal_gcm(&k, b"same").unwrap();
        let b = seal_gcm(&k, b"same").unwrap();
        assert_ne!(a[..GCM_NONCE_SIZE], b[..GCM_NONCE_SIZE]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_gcm_wrong_key() {
        let sealed = seal_gcm(&key(1), b"secret").unwrap();
        let err = open_gcm(&key(2), &sealed).unwrap_err();
        assert!(matches!(err, SealError::Decryption(_)));
    }

    #[test]
    fn test_gcm_truncated() {
        let err = open_gcm(&key(1), &[0u8; 20]).unwrap_err();
        assert!(matches!(err, SealError::Decryption(_)));
    }

    #[tokio::test]
    async fn test_backend_reports_fallback_format() {
        let backend = LocalAeadBackend::new();
        assert_eq!(backend.format(), EnvelopeFormat::FallbackV1);
        let sealed = backend.seal("user-1", &key(4), b"x").await.unwrap();
        assert_eq!(backend.open("user-1", &key(4), &sealed).await.unwrap(), b"x");
    }
}
