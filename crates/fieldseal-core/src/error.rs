use thiserror::Error;

pub type SealResult<T> = Result<T, SealError>;

#[derive(Debug, Error)]
pub enum SealError {
    /// Trusted secret missing or too weak. Blocks every operation.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Missing/invalid bearer credential, or caller identity does not match the user id.
    #[error("authentication error: {0}")]
    Authentication(String),

    /// Both encryption backends failed; the write must be aborted.
    #[error("encryption error: {0}")]
    Encryption(String),

    /// Tag mismatch, corrupted envelope, or wrong key.
    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Network failure talking to a trusted boundary. Retryable.
    #[error("transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SealError {
    /// Stable, machine-readable error class used in reports and HTTP bodies.
    pub fn class(&self) -> &'static str {
        match self {
            SealError::Configuration(_) => "configuration_error",
            SealError::Authentication(_) => "authentication_error",
            SealError::Encryption(_) => "encryption_error",
            SealError::Decryption(_) => "decryption_error",
            SealError::InvalidArgument(_) => "invalid_argument",
            SealError::Storage(_) => "storage_error",
            SealError::Transport(_) => "transport_error",
            SealError::Io(_) => "io_error",
            SealError::Other(_) => "internal_error",
        }
    }

    /// Whether retrying the same call could succeed without operator action.
    pub fn is_transient(&self) -> bool {
        matches!(self, SealError::Transport(_) | SealError::Io(_))
    }
}
