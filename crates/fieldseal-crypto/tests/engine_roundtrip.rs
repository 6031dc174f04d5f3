//! End-to-end encrypt/decrypt/hash behaviour through the public API.

use fieldseal_core::{EncryptedValue, EnvelopeFormat, SealError};
use fieldseal_crypto::{
    decode_envelope, encode_envelope, CipherBackend, EncryptionEngine, KeyManager,
    LocalAeadBackend, LocalBoundary, LocalKeySource, SearchHashEngine, GCM_NONCE_SIZE,
};
use secrecy::SecretString;
use std::sync::Arc;

fn keys() -> Arc<KeyManager> {
    let secret = SecretString::from("integration-secret-integration-secret");
    Arc::new(KeyManager::new(Arc::new(LocalKeySource::new(Some(secret), 32))))
}

fn engine() -> EncryptionEngine {
    EncryptionEngine::new(
        keys(),
        Arc::new(LocalBoundary::new()),
        Arc::new(LocalAeadBackend::new()),
    )
    .expect("engine")
}

/// Primary backend that is never available, forcing `fallback-v1` writes.
struct Unavailable;

#[async_trait::async_trait]
impl CipherBackend for Unavailable {
    fn format(&self) -> EnvelopeFormat {
        EnvelopeFormat::Primary
    }

    async fn seal(
        &self,
        _: &str,
        _: &fieldseal_crypto::UserKey,
        _: &[u8],
    ) -> fieldseal_core::SealResult<Vec<u8>> {
        Err(SealError::Configuration("primary backend not deployed".into()))
    }

    async fn open(
        &self,
        _: &str,
        _: &fieldseal_crypto::UserKey,
        _: &[u8],
    ) -> fieldseal_core::SealResult<Vec<u8>> {
        Err(SealError::Configuration("primary backend not deployed".into()))
    }
}

fn fallback_engine() -> EncryptionEngine {
    EncryptionEngine::new(keys(), Arc::new(Unavailable), Arc::new(LocalAeadBackend::new()))
        .expect("engine")
}

#[tokio::test]
async fn q4_release_roundtrip() {
    let engine = engine();
    let value = engine.encrypt("Q4 Release", "user-1").await.unwrap();
    assert_eq!(engine.decrypt(&value, "user-1").await.unwrap(), "Q4 Release");
}

#[tokio::test]
async fn stored_field_roundtrip_through_text_columns() {
    let engine = engine();
    let field = engine.encrypt_field("Q4 Release", "user-1").await.unwrap();
    assert!(field.encrypted.starts_with("primary:"));
    assert_eq!(field.hash, SearchHashEngine.hash("q4 release", "user-1").unwrap());
    assert_eq!(
        engine.decrypt_str(&field.encrypted, "user-1").await.unwrap(),
        "Q4 Release"
    );
}

#[test]
fn same_text_hashes_differently_per_user() {
    let h1 = SearchHashEngine.hash("Q4 Release", "user-1").unwrap();
    let h2 = SearchHashEngine.hash("Q4 Release", "user-2").unwrap();
    assert_ne!(h1, h2);
}

#[tokio::test]
async fn fallback_envelope_rejects_other_users_key() {
    let engine = fallback_engine();
    let value = engine.encrypt("Task A", "user-1").await.unwrap();
    assert_eq!(value.format, EnvelopeFormat::FallbackV1);

    let err = engine.decrypt(&value, "user-2").await.unwrap_err();
    assert!(matches!(err, SealError::Decryption(_)), "got {err:?}");
}

#[tokio::test]
async fn fallback_written_while_primary_down_reads_once_primary_is_back() {
    let written = fallback_engine()
        .encrypt_field("Task A", "user-1")
        .await
        .unwrap();
    assert!(written.encrypted.starts_with("fallback-v1:"));
    assert_eq!(
        engine().decrypt_str(&written.encrypted, "user-1").await.unwrap(),
        "Task A"
    );
}

#[tokio::test]
async fn fallback_payload_carries_96_bit_nonce_prefix() {
    let engine = fallback_engine();
    let a = engine.encrypt("same", "user-1").await.unwrap();
    let b = engine.encrypt("same", "user-1").await.unwrap();
    assert_ne!(a.payload[..GCM_NONCE_SIZE], b.payload[..GCM_NONCE_SIZE]);
}

#[tokio::test]
async fn primary_payload_relabelled_as_fallback_fails() {
    let engine = engine();
    let primary = engine.encrypt("Task A", "user-1").await.unwrap();
    let relabelled = EncryptedValue::new(EnvelopeFormat::FallbackV1, primary.payload);
    let err = engine.decrypt(&relabelled, "user-1").await.unwrap_err();
    assert!(matches!(err, SealError::Decryption(_)));
}

#[tokio::test]
async fn encoded_envelope_survives_storage() {
    let engine = fallback_engine();
    let value = engine.encrypt("Task A", "user-1").await.unwrap();
    let decoded = decode_envelope(&encode_envelope(&value)).unwrap();
    assert_eq!(decoded, value);
}

mod proptest_suite {
    use super::*;
    use proptest::prelude::*;
    use tokio_test::block_on;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn roundtrip_any_text(text in "\\PC{1,200}", user in "[a-z0-9-]{1,24}") {
            let engine = engine();
            let value = block_on(engine.encrypt(&text, &user)).unwrap();
            prop_assert_eq!(block_on(engine.decrypt(&value, &user)).unwrap(), text);
        }

        #[test]
        fn any_flipped_bit_fails_closed(
            text in "\\PC{1,64}",
            bit in any::<prop::sample::Index>(),
        ) {
            let engine = fallback_engine();
            let mut value = block_on(engine.encrypt(&text, "user-1")).unwrap();

            let bit = bit.index(value.payload.len() * 8);
            value.payload[bit / 8] ^= 1 << (bit % 8);

            let err = block_on(engine.decrypt(&value, "user-1")).unwrap_err();
            prop_assert!(matches!(err, SealError::Decryption(_)));
        }
    }
}
