use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::SealError;

/// Where the current process runs relative to the trusted secret
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionContext {
    /// Holds `KEY_MATERIAL` and derives keys directly
    Trusted,
    /// Must request key material from the issuance boundary
    Untrusted,
}

/// Envelope tag selecting the backend that produced a ciphertext
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnvelopeFormat {
    #[serde(rename = "primary")]
    Primary,
    #[serde(rename = "fallback-v1")]
    FallbackV1,
}

impl EnvelopeFormat {
    pub fn tag(&self) -> &'static str {
        match self {
            EnvelopeFormat::Primary => "primary",
            EnvelopeFormat::FallbackV1 => "fallback-v1",
        }
    }
}

impl fmt::Display for EnvelopeFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for EnvelopeFormat {
    type Err = SealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(EnvelopeFormat::Primary),
            "fallback-v1" => Ok(EnvelopeFormat::FallbackV1),
            other => Err(SealError::Decryption(format!(
                "unknown envelope tag: {other:?}"
            ))),
        }
    }
}

/// A tagged ciphertext. For `fallback-v1` the payload starts with the 96-bit nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedValue {
    pub format: EnvelopeFormat,
    pub payload: Vec<u8>,
}

impl EncryptedValue {
    pub fn new(format: EnvelopeFormat, payload: Vec<u8>) -> Self {
        Self { format, payload }
    }

    /// The envelope of the empty string: no ciphertext at all.
    pub fn empty() -> Self {
        Self {
            format: EnvelopeFormat::Primary,
            payload: Vec::new(),
        }
    }

    /// True only for [`EncryptedValue::empty`]. A `fallback-v1` value with no
    /// payload is truncated ciphertext, not empty plaintext.
    pub fn is_empty(&self) -> bool {
        self.format == EnvelopeFormat::Primary && self.payload.is_empty()
    }
}

/// Historical key-derivation schemes, newest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Primary,
    /// Earlier derivation label, read-only compatibility
    Fallback,
    /// Fixed public placeholder secret. Weakened; only for reading very old rows.
    Legacy,
}

impl KeyType {
    /// Order in which schemes are tried when decryption fails.
    pub const DECRYPT_ORDER: [KeyType; 3] = [KeyType::Primary, KeyType::Fallback, KeyType::Legacy];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Primary => "primary",
            KeyType::Fallback => "fallback",
            KeyType::Legacy => "legacy",
        }
    }

    /// Domain-separation label prefixed to the user id before HMAC.
    pub fn label(&self) -> &'static str {
        match self {
            KeyType::Primary => "primary-key|",
            KeyType::Fallback => "fallback-key|",
            KeyType::Legacy => "legacy-key|",
        }
    }
}

impl fmt::Display for KeyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyType {
    type Err = SealError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "primary" => Ok(KeyType::Primary),
            "fallback" => Ok(KeyType::Fallback),
            "legacy" => Ok(KeyType::Legacy),
            other => Err(SealError::InvalidArgument(format!(
                "unknown key type: {other:?}"
            ))),
        }
    }
}

/// The two sibling columns persisted per text field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredField {
    /// Encoded envelope (`<tag>:<base64>`, or empty for the empty string)
    pub encrypted: String,
    /// Salted search hash (hex)
    pub hash: String,
}

/// Column names for a logical text field: `<field>_encrypted`, `<field>_hash`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldColumns {
    pub encrypted: String,
    pub hash: String,
}

impl FieldColumns {
    pub fn for_field(field: &str) -> Self {
        Self {
            encrypted: format!("{field}_encrypted"),
            hash: format!("{field}_hash"),
        }
    }
}

/// Transient per-row unit of work evaluated by a migration run. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationRecord {
    pub id: String,
    pub user_id: String,
    pub current_hash: String,
    pub recomputed_hash: String,
    pub migrated: bool,
}
