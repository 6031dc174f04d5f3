//! Machine-readable migration summary

use fieldseal_core::SealError;
use serde::Serialize;

use crate::service::MigrationMode;

/// What happened to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Stored hash was legacy and has been rewritten
    Migrated,
    /// Would have been rewritten (dry run)
    WouldMigrate,
    AlreadySalted,
    /// Stored hash matches neither scheme; left untouched
    Anomalous,
    DecryptFailed,
    WriteFailed,
    /// No ciphertext and no hash in this field
    Empty,
    /// A live write replaced the hash between read and rewrite
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub id: String,
    /// [`SealError::class`]
    pub class: String,
    pub message: String,
}

impl Failure {
    pub fn new(id: &str, err: &SealError) -> Self {
        Self {
            id: id.to_string(),
            class: err.class().to_string(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub table: String,
    pub field: String,
    pub mode: MigrationMode,

    pub records_scanned: u64,
    pub records_migrated: u64,
    pub records_would_migrate: u64,
    pub records_already_salted: u64,
    pub records_anomalous: u64,
    pub records_empty: u64,
    pub records_superseded: u64,
    /// Left untouched on purpose: already salted, anomalous, empty, or superseded
    pub records_skipped: u64,
    pub decrypt_failures: u64,
    pub write_failures: u64,

    /// Rows that only opened under an older key scheme
    pub fallback_key_reads: u64,
    pub legacy_key_reads: u64,

    pub batches_committed: u64,
    /// Batches with at least one failed write
    pub batches_failed: u64,
    pub start_offset: usize,
    pub next_offset: usize,

    /// Validate mode only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampled: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatches: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mismatch_rate: Option<f64>,

    /// Operator requested a stop; the run ended at a batch boundary
    pub stopped: bool,
    /// Storage became unreachable; the run ended early
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,

    pub failures: Vec<Failure>,
    /// Ids whose hash matched neither scheme
    pub anomalies: Vec<String>,
}

impl MigrationReport {
    pub fn new(table: &str, field: &str, mode: MigrationMode, start_offset: usize) -> Self {
        Self {
            table: table.to_string(),
            field: field.to_string(),
            mode,
            start_offset,
            next_offset: start_offset,
            ..Default::default()
        }
    }

    pub fn record(&mut self, id: &str, outcome: Outcome) {
        self.records_scanned += 1;
        match outcome {
            Outcome::Migrated => self.records_migrated += 1,
            Outcome::WouldMigrate => self.records_would_migrate += 1,
            Outcome::AlreadySalted => {
                self.records_already_salted += 1;
                self.records_skipped += 1;
            }
            Outcome::Anomalous => {
                self.records_anomalous += 1;
                self.records_skipped += 1;
                self.anomalies.push(id.to_string());
            }
            Outcome::Empty => {
                self.records_empty += 1;
                self.records_skipped += 1;
            }
            Outcome::Superseded => {
                self.records_superseded += 1;
                self.records_skipped += 1;
            }
            Outcome::DecryptFailed => self.decrypt_failures += 1,
            Outcome::WriteFailed => self.write_failures += 1,
        }
    }

    pub fn fail(&mut self, id: &str, outcome: Outcome, err: &SealError) {
        self.record(id, outcome);
        self.failures.push(Failure::new(id, err));
    }

    /// Every batch committed and the run reached the end of the table.
    pub fn is_success(&self) -> bool {
        self.batches_failed == 0 && !self.stopped && self.aborted.is_none()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
