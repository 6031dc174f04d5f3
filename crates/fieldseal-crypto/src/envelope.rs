//! Text encoding of [`EncryptedValue`] for a `<field>_encrypted` column.
//!
//! ```text
//! primary:<base64 payload>
//! fallback-v1:<base64 payload>
//! ```
//!
//! The empty string is the envelope of empty plaintext.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use fieldseal_core::{EncryptedValue, EnvelopeFormat, SealError, SealResult};

const SEPARATOR: char = ':';

pub fn encode_envelope(value: &EncryptedValue) -> String {
    if value.is_empty() {
        return String::new();
    }
    format!(
        "{}{SEPARATOR}{}",
        value.format.tag(),
        STANDARD.encode(&value.payload)
    )
}

pub fn decode_envelope(encoded: &str) -> SealResult<EncryptedValue> {
    if encoded.is_empty() {
        return Ok(EncryptedValue::empty());
    }

    let (tag, body) = encoded.split_once(SEPARATOR).ok_or_else(|| {
        SealError::Decryption("envelope has no format tag".into())
    })?;
    let format: EnvelopeFormat = tag.parse()?;
    let payload = STANDARD
        .decode(body.as_bytes())
        .map_err(|e| SealError::Decryption(format!("{format} envelope is not valid base64: {e}")))?;
    if payload.is_empty() {
        return Err(SealError::Decryption(format!(
            "{format} envelope has an empty payload"
        )));
    }
    Ok(EncryptedValue::new(format, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode() {
        let value = EncryptedValue::new(EnvelopeFormat::FallbackV1, vec![1, 2, 3, 4]);
        let encoded = encode_envelope(&value);
        assert!(encoded.starts_with("fallback-v1:"));
        assert_eq!(decode_envelope(&encoded).unwrap(), value);
    }

    #[test]
    fn test_empty_envelope() {
        assert_eq!(encode_envelope(&EncryptedValue::empty()), "");
        assert!(decode_envelope("").unwrap().is_empty());
    }

    #[test]
    fn test_untagged_value_rejected() {
        let err = decode_envelope("aGVsbG8=").unwrap_err();
        assert!(matches!(err, SealError::Decryption(_)));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = decode_envelope("v0:aGVsbG8=").unwrap_err();
        assert!(matches!(err, SealError::Decryption(_)));
    }

    #[test]
    fn test_bad_base64_rejected() {
        let err = decode_envelope("primary:@@@").unwrap_err();
        assert!(matches!(err, SealError::Decryption(_)));
    }

    #[test]
    fn test_tag_without_payload_rejected() {
        let err = decode_envelope("primary:").unwrap_err();
        assert!(matches!(err, SealError::Decryption(_)));
    }
}
