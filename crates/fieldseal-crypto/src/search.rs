//! Salted search hashes (blind index) for exact-match lookup without decryption.
//!
//! An unsalted hash of the text is searchable but falls to rainbow tables and
//! correlates identical values across users. Salting with a per-user value
//! keeps equality search O(1) while removing both leaks. The unsalted form is
//! still computable so rows written before salting can be found and migrated.

use fieldseal_core::{SealError, SealResult};
use sha2::{Digest, Sha256};

/// Domain label hashed with the user id to form the per-user salt.
pub const SALT_LABEL: &str = "search-salt|";

/// Lower-case and trim, so lookups ignore case and surrounding whitespace.
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SearchHashEngine;

impl SearchHashEngine {
    pub fn new() -> Self {
        Self
    }

    /// `SHA-256(SHA-256("search-salt|" || user_id) || normalize(text))`, hex.
    pub fn hash(&self, text: &str, user_id: &str) -> SealResult<String> {
        if user_id.is_empty() {
            return Err(SealError::InvalidArgument(
                "search hash requires a non-empty user id".into(),
            ));
        }
        let salt = user_salt(user_id);
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(normalize(text).as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    /// `SHA-256(normalize(text))`, hex. Migration and read-path fallback only.
    pub fn legacy_hash(&self, text: &str) -> String {
        hex::encode(Sha256::digest(normalize(text).as_bytes()))
    }

    /// Hashes to query for `text`, salted first. Rows not yet migrated match the second.
    pub fn search_terms(&self, text: &str, user_id: &str) -> SealResult<[String; 2]> {
        Ok([self.hash(text, user_id)?, self.legacy_hash(text)])
    }

    pub fn matches_salted(&self, stored: &str, text: &str, user_id: &str) -> SealResult<bool> {
        Ok(self.hash(text, user_id)?.eq_ignore_ascii_case(stored))
    }

    pub fn matches_legacy(&self, stored: &str, text: &str) -> bool {
        self.legacy_hash(text).eq_ignore_ascii_case(stored)
    }
}

fn user_salt(user_id: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(SALT_LABEL.as_bytes());
    hasher.update(user_id.as_bytes());
    hasher.finalize().into()
}
