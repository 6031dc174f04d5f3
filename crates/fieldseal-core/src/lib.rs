pub mod config;
pub mod error;
pub mod types;

pub use error::{SealError, SealResult};
pub use types::{
    EncryptedValue, EnvelopeFormat, ExecutionContext, FieldColumns, KeyType, MigrationRecord,
    StoredField,
};

/// Minimum accepted length (in characters) of the trusted key-derivation secret
pub const MIN_SECRET_LEN: usize = 32;
