//! EncryptionEngine: encrypt and decrypt text fields under a user's key.
//!
//! Writes go to the primary backend first and fall back to the local
//! `fallback-v1` backend on any primary failure. Reads dispatch on the
//! envelope tag. A `primary` envelope that fails to authenticate is retried
//! under each older key scheme in [`KeyType::DECRYPT_ORDER`] before the read
//! fails; `fallback-v1` envelopes were only ever written under the primary key.

use fieldseal_core::config::KeysConfig;
use fieldseal_core::{
    EncryptedValue, EnvelopeFormat, ExecutionContext, KeyType, SealError, SealResult,
    StoredField,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::backend::{CipherBackend, LocalAeadBackend};
use crate::boundary::{HttpBoundary, LocalBoundary};
use crate::client::BoundaryClient;
use crate::envelope::{decode_envelope, encode_envelope};
use crate::manager::KeyManager;
use crate::search::SearchHashEngine;
use crate::source::{KeySource, LocalKeySource, RemoteKeySource};

/// Result of opening one envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Opened {
    pub plaintext: String,
    /// Key scheme that authenticated the payload; `None` for the empty envelope.
    pub scheme: Option<KeyType>,
}

/// Per-record result of [`EncryptionEngine::decrypt_many`].
#[derive(Debug)]
pub struct DecryptOutcome {
    pub id: String,
    pub result: SealResult<String>,
}

pub struct EncryptionEngine {
    keys: Arc<KeyManager>,
    primary: Arc<dyn CipherBackend>,
    fallback: Arc<dyn CipherBackend>,
    search: SearchHashEngine,
}

impl EncryptionEngine {
    pub fn new(
        keys: Arc<KeyManager>,
        primary: Arc<dyn CipherBackend>,
        fallback: Arc<dyn CipherBackend>,
    ) -> SealResult<Self> {
        if primary.format() != EnvelopeFormat::Primary {
            return Err(SealError::Configuration(format!(
                "primary backend writes {} envelopes",
                primary.format()
            )));
        }
        if fallback.format() != EnvelopeFormat::FallbackV1 {
            return Err(SealError::Configuration(format!(
                "fallback backend writes {} envelopes",
                fallback.format()
            )));
        }
        Ok(Self {
            keys,
            primary,
            fallback,
            search: SearchHashEngine::new(),
        })
    }

    /// Wire up key source and primary backend for the configured context.
    ///
    /// Trusted: derive from the secret in `secret_env`, boundary in-process.
    /// Untrusted: both key issuance and the primary backend go through
    /// `boundary_url` with the bearer credential from `bearer_token_env`.
    pub fn from_config(config: &KeysConfig) -> SealResult<Self> {
        let (source, primary): (Arc<dyn KeySource>, Arc<dyn CipherBackend>) = match config.context
        {
            ExecutionContext::Trusted => (
                Arc::new(LocalKeySource::from_env(
                    &config.secret_env,
                    config.min_secret_len,
                )),
                Arc::new(LocalBoundary::new()),
            ),
            ExecutionContext::Untrusted => {
                let client = Arc::new(BoundaryClient::from_config(config)?);
                (
                    Arc::new(RemoteKeySource::new(client.clone())),
                    Arc::new(HttpBoundary::new(client)),
                )
            }
        };
        debug!(
            context = ?config.context,
            source = source.describe(),
            legacy_scheme = config.enable_legacy_scheme,
            "encryption engine configured"
        );
        let keys =
            KeyManager::new(source).with_legacy_scheme(config.enable_legacy_scheme);
        Self::new(Arc::new(keys), primary, Arc::new(LocalAeadBackend::new()))
    }

    pub fn keys(&self) -> &KeyManager {
        &self.keys
    }

    pub fn search(&self) -> &SearchHashEngine {
        &self.search
    }

    /// Encrypt `plaintext` for `user_id`.
    ///
    /// Fails with the key error if no key can be obtained, and with
    /// [`SealError::Encryption`] if both backends fail. Never returns plaintext.
    pub async fn encrypt(&self, plaintext: &str, user_id: &str) -> SealResult<EncryptedValue> {
        let key = self.keys.get_user_key(user_id).await?;
        if plaintext.is_empty() {
            return Ok(EncryptedValue::empty());
        }

        let primary_err = match self.primary.seal(user_id, &key, plaintext.as_bytes()).await {
            Ok(payload) => return Ok(EncryptedValue::new(EnvelopeFormat::Primary, payload)),
            Err(e) => e,
        };
        warn!(
            user_id = %user_id,
            class = primary_err.class(),
            "primary backend failed, using fallback-v1: {primary_err}"
        );

        match self.fallback.seal(user_id, &key, plaintext.as_bytes()).await {
            Ok(payload) => Ok(EncryptedValue::new(EnvelopeFormat::FallbackV1, payload)),
            Err(fallback_err) => Err(SealError::Encryption(format!(
                "both backends failed (primary: {primary_err}; fallback-v1: {fallback_err})"
            ))),
        }
    }

    /// Encrypt and hash together, so callers write both columns at once.
    pub async fn encrypt_field(&self, plaintext: &str, user_id: &str) -> SealResult<StoredField> {
        let hash = self.search.hash(plaintext, user_id)?;
        let value = self.encrypt(plaintext, user_id).await?;
        Ok(StoredField {
            encrypted: encode_envelope(&value),
            hash,
        })
    }

    pub async fn decrypt(&self, value: &EncryptedValue, user_id: &str) -> SealResult<String> {
        Ok(self.open(value, user_id).await?.plaintext)
    }

    /// Decrypt an encoded `<field>_encrypted` column value.
    pub async fn decrypt_str(&self, encoded: &str, user_id: &str) -> SealResult<String> {
        let value = decode_envelope(encoded)?;
        self.decrypt(&value, user_id).await
    }

    /// Like [`decrypt`](Self::decrypt), also reporting which key scheme opened it.
    pub async fn open(&self, value: &EncryptedValue, user_id: &str) -> SealResult<Opened> {
        if user_id.is_empty() {
            return Err(SealError::InvalidArgument("user id must not be empty".into()));
        }
        if value.is_empty() {
            return Ok(Opened {
                plaintext: String::new(),
                scheme: None,
            });
        }
        if value.payload.is_empty() {
            return Err(SealError::Decryption(format!(
                "{} envelope has an empty payload",
                value.format
            )));
        }

        let (bytes, scheme) = match value.format {
            EnvelopeFormat::FallbackV1 => {
                let key = self.keys.get_user_key(user_id).await?;
                let bytes = self.fallback.open(user_id, &key, &value.payload).await?;
                (bytes, KeyType::Primary)
            }
            EnvelopeFormat::Primary => self.open_primary(&value.payload, user_id).await?,
        };

        let plaintext = String::from_utf8(bytes).map_err(|_| {
            SealError::Decryption(format!("{} payload is not valid UTF-8", value.format))
        })?;
        Ok(Opened {
            plaintext,
            scheme: Some(scheme),
        })
    }

    async fn open_primary(&self, payload: &[u8], user_id: &str) -> SealResult<(Vec<u8>, KeyType)> {
        let mut last_err = None;
        for scheme in self.keys.decrypt_schemes() {
            let key = self.keys.key_for(user_id, scheme).await?;
            match self.primary.open(user_id, &key, payload).await {
                Ok(bytes) => {
                    if scheme == KeyType::Legacy {
                        warn!(
                            user_id = %user_id,
                            "row opened under the legacy placeholder key; re-encrypt it"
                        );
                    } else if scheme != KeyType::Primary {
                        debug!(user_id = %user_id, scheme = %scheme, "row opened under older key scheme");
                    }
                    return Ok((bytes, scheme));
                }
                Err(SealError::Decryption(msg)) => last_err = Some(msg),
                Err(other) => return Err(other),
            }
        }
        Err(SealError::Decryption(format!(
            "primary envelope did not open under any key scheme: {}",
            last_err.unwrap_or_else(|| "no schemes enabled".into())
        )))
    }

    /// Decrypt a batch of `(id, encoded)` rows owned by `user_id`.
    ///
    /// Failures are logged with the row id and returned in place; one bad row
    /// never aborts the rest.
    pub async fn decrypt_many<'a, I>(&self, user_id: &str, rows: I) -> Vec<DecryptOutcome>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut outcomes = Vec::new();
        for (id, encoded) in rows {
            let result = self.decrypt_str(encoded, user_id).await;
            if let Err(e) = &result {
                warn!(id = %id, user_id = %user_id, class = e.class(), "decrypt failed: {e}");
            }
            outcomes.push(DecryptOutcome {
                id: id.to_string(),
                result,
            });
        }
        outcomes
    }

    /// `[salted, legacy]` hashes to query for `text`.
    pub fn search_terms(&self, text: &str, user_id: &str) -> SealResult<[String; 2]> {
        self.search.search_terms(text, user_id)
    }
}
