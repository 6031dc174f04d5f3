//! fieldseal-migrate: move stored search hashes from the legacy unsalted
//! scheme to the per-user salted scheme, online and in resumable batches,
//! and search the same columns while that is under way.
//!
//! Run lifecycle:
//! ```text
//! Idle -> Scanning(offset) -> Deciding(record) -> {Skip | Rewrite(record)}
//!      -> Scanning(offset + batch) -> ... -> Done
//! ```

pub mod checkpoint;
pub mod lookup;
pub mod report;
pub mod service;

pub use checkpoint::{Checkpoint, CheckpointStore};
pub use lookup::{FieldSearch, MatchedTerm, SearchResults};
pub use report::{Failure, MigrationReport, Outcome};
pub use service::{HashMigrationService, MigrationMode, MigrationOptions, ProgressFn};

/// Records per batch when none is given
pub const DEFAULT_BATCH_SIZE: usize = 100;
