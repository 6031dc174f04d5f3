//! fieldseal-crypto: confidentiality and searchability for user-generated text fields
//!
//! Key hierarchy:
//! ```text
//! KEY_MATERIAL (trusted secret, >= 32 chars, never leaves the trusted context)
//!   ├── UserKey primary   = HMAC-SHA256(secret, "primary-key|"  || user_id)
//!   ├── UserKey fallback  = HMAC-SHA256(secret, "fallback-key|" || user_id)   (read-only compat)
//!   └── UserKey legacy    = HMAC-SHA256(PLACEHOLDER, "legacy-key|" || user_id) (weakened, read-only)
//!
//! Envelope formats:
//!   primary      boundary AEAD: XChaCha20-Poly1305, [24-byte nonce][ciphertext][16-byte tag]
//!   fallback-v1  local AEAD:    AES-256-GCM,       [12-byte nonce][ciphertext][16-byte tag]
//!
//! Search hash (blind index):
//!   salt(user_id) = SHA-256("search-salt|" || user_id)
//!   hash          = SHA-256(salt || lower(trim(text)))       hex, 64 chars
//!   legacy hash   = SHA-256(lower(trim(text)))               migration only
//! ```

pub mod backend;
pub mod boundary;
pub mod cache;
pub mod client;
pub mod engine;
pub mod envelope;
pub mod keys;
pub mod manager;
pub mod search;
pub mod source;
pub mod wire;

pub use backend::{CipherBackend, LocalAeadBackend};
pub use boundary::{HttpBoundary, LocalBoundary};
pub use cache::KeyCache;
pub use client::BoundaryClient;
pub use engine::{DecryptOutcome, EncryptionEngine, Opened};
pub use envelope::{decode_envelope, encode_envelope};
pub use keys::{derive_user_key, UserKey};
pub use manager::KeyManager;
pub use search::{normalize, SearchHashEngine};
pub use source::{KeySource, LocalKeySource, RemoteKeySource};

/// Size of a user key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of an XChaCha20-Poly1305 nonce (192-bit), primary envelopes
pub const XNONCE_SIZE: usize = 24;

/// Size of an AES-GCM nonce (96-bit), fallback-v1 envelopes
pub const GCM_NONCE_SIZE: usize = 12;

/// Size of a Poly1305 / GHASH authentication tag
pub const TAG_SIZE: usize = 16;
