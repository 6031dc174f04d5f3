//! JSON bodies exchanged with the trusted boundary (`fieldsealed`)

use fieldseal_core::{KeyType, SealError};
use serde::{Deserialize, Serialize};

pub const KEYS_PATH: &str = "/v1/keys";
pub const SEAL_PATH: &str = "/v1/boundary/seal";
pub const OPEN_PATH: &str = "/v1/boundary/open";

/// `POST /v1/keys`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    pub user_id: String,
    pub key_type: KeyType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyResponse {
    /// 64 hex characters
    pub encryption_key: String,
}

/// `POST /v1/boundary/seal` and `POST /v1/boundary/open`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryRequest {
    pub user_id: String,
    /// Derived user key, hex
    pub key: String,
    /// Plaintext (seal) or primary payload (open), base64
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoundaryResponse {
    /// base64
    pub data: String,
}

/// Error body returned with every non-2xx response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// [`SealError::class`]
    pub error: String,
    pub message: String,
}

impl ErrorBody {
    pub fn from_error(err: &SealError) -> Self {
        Self {
            error: err.class().to_string(),
            message: err.to_string(),
        }
    }

    /// Map an error response back onto the taxonomy.
    ///
    /// The class wins over the status code so that a configuration error
    /// reported with a 500 is not mistaken for a retryable server fault.
    pub fn into_error(body: Option<ErrorBody>, status: u16) -> SealError {
        let message = body
            .as_ref()
            .map(|b| b.message.clone())
            .unwrap_or_else(|| format!("boundary returned HTTP {status}"));
        match body.as_ref().map(|b| b.error.as_str()) {
            Some("configuration_error") => SealError::Configuration(message),
            Some("authentication_error") => SealError::Authentication(message),
            Some("decryption_error") => SealError::Decryption(message),
            Some("encryption_error") => SealError::Encryption(message),
            Some("invalid_argument") => SealError::InvalidArgument(message),
            _ => match status {
                401 | 403 => SealError::Authentication(message),
                400 | 422 => SealError::InvalidArgument(message),
                _ => SealError::Transport(message),
            },
        }
    }
}
