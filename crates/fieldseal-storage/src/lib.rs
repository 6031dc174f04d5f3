//! fieldseal-storage: where encrypted columns and their search hashes live

pub mod health;
pub mod operator;
pub mod records;

pub use health::{check_health, is_healthy};
pub use operator::{build_from_config, build_memory_operator, build_s3_operator, S3Config};
pub use records::{FieldRecord, OpendalRecordStore, RecordStore};
