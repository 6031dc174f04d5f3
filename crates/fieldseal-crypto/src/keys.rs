//! Per-user key derivation: trusted secret + user id → 256-bit key

use fieldseal_core::{KeyType, SealError, SealResult};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::KEY_SIZE;

type HmacSha256 = Hmac<Sha256>;

/// Non-secret placeholder behind the `legacy` scheme.
///
/// Anyone can recompute legacy keys from this value. It exists only so that
/// very old rows stay readable; nothing is ever encrypted under it.
/// TODO: remove once migration reports show `legacy_key_reads == 0` across all tables.
pub const LEGACY_PLACEHOLDER: &str = "fieldseal-legacy-placeholder-not-a-secret";

/// A 256-bit user key. Zeroized on drop, never persisted.
#[derive(Clone)]
pub struct UserKey {
    bytes: [u8; KEY_SIZE],
}

impl UserKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// Hex form used on the key issuance wire.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }

    pub fn from_hex(s: &str) -> SealResult<Self> {
        let mut decoded = hex::decode(s.trim())
            .map_err(|e| SealError::InvalidArgument(format!("key is not valid hex: {e}")))?;
        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(SealError::InvalidArgument(format!(
                "key has wrong size: {len} bytes (expected {KEY_SIZE})"
            )));
        }
        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self::from_bytes(bytes))
    }
}

impl Drop for UserKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for UserKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Reject a missing or short trusted secret.
pub fn validate_secret(secret: &SecretString, min_len: usize) -> SealResult<()> {
    let len = secret.expose_secret().chars().count();
    if len < min_len {
        return Err(SealError::Configuration(format!(
            "trusted secret is {len} characters, minimum is {min_len}"
        )));
    }
    Ok(())
}

/// Derive the user key for `key_type`.
///
/// `primary` and `fallback` are keyed by the trusted secret; `legacy` ignores it
/// and uses [`LEGACY_PLACEHOLDER`].
pub fn derive_user_key(
    secret: &SecretString,
    user_id: &str,
    key_type: KeyType,
) -> SealResult<UserKey> {
    match key_type {
        KeyType::Legacy => derive_legacy_key(user_id),
        KeyType::Primary | KeyType::Fallback => hmac_derive(
            secret.expose_secret().as_bytes(),
            key_type.label(),
            user_id,
        ),
    }
}

/// Derive the weakened placeholder-keyed user key. Needs no secret.
pub fn derive_legacy_key(user_id: &str) -> SealResult<UserKey> {
    hmac_derive(
        LEGACY_PLACEHOLDER.as_bytes(),
        KeyType::Legacy.label(),
        user_id,
    )
}

/// HMAC-SHA256(key, label || user_id), which is exactly 32 bytes.
fn hmac_derive(key: &[u8], label: &str, user_id: &str) -> SealResult<UserKey> {
    if user_id.is_empty() {
        return Err(SealError::InvalidArgument("user id must not be empty".into()));
    }
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| SealError::Configuration(format!("HMAC key rejected: {e}")))?;
    mac.update(label.as_bytes());
    mac.update(user_id.as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut bytes = [0u8; KEY_SIZE];
    bytes.copy_from_slice(&digest[..KEY_SIZE]);
    Ok(UserKey::from_bytes(bytes))
}
