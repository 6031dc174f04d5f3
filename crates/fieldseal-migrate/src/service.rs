//! HashMigrationService: batch re-hashing of one `<field>_hash` column.
//!
//! Per record: decrypt the ciphertext, recompute both hashes, and rewrite the
//! stored hash only when it equals the legacy hash and differs from the salted
//! one. Rows already on the salted scheme are never written, so re-running a
//! finished (or crashed) migration is safe.

use fieldseal_core::config::MigrationConfig;
use fieldseal_core::{KeyType, MigrationRecord, SealResult};
use fieldseal_crypto::{decode_envelope, EncryptionEngine};
use fieldseal_storage::{FieldRecord, RecordStore};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::report::{MigrationReport, Outcome};

/// Progress callback: (records scanned, batches finished, message)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationMode {
    /// Rewrite legacy hashes
    #[default]
    Execute,
    /// Decide every record, write nothing
    DryRun,
    /// Sample records and report the share not on the salted scheme
    Validate,
}

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    pub table: String,
    pub field: String,
    pub batch_size: usize,
    pub mode: MigrationMode,
    pub start_offset: usize,
    /// Records to examine in validate mode
    pub validate_sample: usize,
    /// Continue from the checkpoint left by an earlier run
    pub resume: bool,
}

impl MigrationOptions {
    pub fn new(table: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            field: field.into(),
            batch_size: crate::DEFAULT_BATCH_SIZE,
            mode: MigrationMode::Execute,
            start_offset: 0,
            validate_sample: 100,
            resume: false,
        }
    }

    pub fn from_config(
        table: impl Into<String>,
        field: impl Into<String>,
        config: &MigrationConfig,
    ) -> Self {
        Self {
            batch_size: config.batch_size,
            validate_sample: config.validate_sample,
            ..Self::new(table, field)
        }
    }

    pub fn mode(mut self, mode: MigrationMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// The decision for one record, before any write.
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// One of `WouldMigrate`, `AlreadySalted`, `Anomalous`, `Empty`
    pub outcome: Outcome,
    pub record: MigrationRecord,
    /// Key scheme that opened the ciphertext
    pub scheme: Option<KeyType>,
}

pub struct HashMigrationService {
    engine: Arc<EncryptionEngine>,
    store: Arc<dyn RecordStore>,
    stop: Arc<AtomicBool>,
}

impl HashMigrationService {
    pub fn new(engine: Arc<EncryptionEngine>, store: Arc<dyn RecordStore>) -> Self {
        Self {
            engine,
            store,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Setting the flag ends the run after the in-flight batch.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Apply the decision rule to one stored record. Errors mean the
    /// ciphertext could not be read; the record must be skipped.
    pub async fn evaluate(&self, row: &FieldRecord) -> SealResult<Evaluation> {
        let current_hash = row.field.hash.clone();
        if row.field.encrypted.is_empty() && current_hash.is_empty() {
            return Ok(Evaluation {
                outcome: Outcome::Empty,
                record: MigrationRecord {
                    id: row.id.clone(),
                    user_id: row.user_id.clone(),
                    current_hash,
                    recomputed_hash: String::new(),
                    migrated: false,
                },
                scheme: None,
            });
        }

        let value = decode_envelope(&row.field.encrypted)?;
        let opened = self.engine.open(&value, &row.user_id).await?;
        let search = self.engine.search();
        let salted = search.hash(&opened.plaintext, &row.user_id)?;

        let outcome = if salted.eq_ignore_ascii_case(&current_hash) {
            Outcome::AlreadySalted
        } else if search.matches_legacy(&current_hash, &opened.plaintext) {
            Outcome::WouldMigrate
        } else {
            Outcome::Anomalous
        };

        Ok(Evaluation {
            outcome,
            record: MigrationRecord {
                id: row.id.clone(),
                user_id: row.user_id.clone(),
                current_hash,
                recomputed_hash: salted,
                migrated: false,
            },
            scheme: opened.scheme,
        })
    }

    /// Walk `opts.table` in batches ordered by id and apply `opts.mode`.
    ///
    /// Per-record failures are collected in the report and never stop the run.
    /// A storage scan error ends the run with `aborted` set. In execute mode
    /// the checkpoint advances after each fully committed batch and is cleared
    /// when the whole table has been processed without failures.
    pub async fn migrate_table(
        &self,
        opts: &MigrationOptions,
        mut checkpoint: Option<&mut CheckpointStore>,
        progress: Option<&ProgressFn>,
    ) -> MigrationReport {
        if opts.mode == MigrationMode::Validate {
            return self.validate(opts, progress).await;
        }

        let batch_size = opts.batch_size.max(1);
        let mut offset = opts.start_offset;
        if opts.resume {
            if let Some(cp) = checkpoint
                .as_deref()
                .and_then(|store| store.get(&opts.table, &opts.field))
            {
                info!(
                    table = %opts.table,
                    field = %opts.field,
                    next_offset = cp.next_offset,
                    batches_committed = cp.batches_committed,
                    "resuming from checkpoint"
                );
                offset = offset.max(cp.next_offset);
            }
        }

        let mut report = MigrationReport::new(&opts.table, &opts.field, opts.mode, offset);
        let mut contiguous = true;
        info!(
            table = %opts.table,
            field = %opts.field,
            mode = ?opts.mode,
            batch_size,
            start_offset = offset,
            "migration started"
        );

        loop {
            if self.stop_requested() {
                info!(offset, "stop requested; ending at batch boundary");
                report.stopped = true;
                break;
            }

            let batch = match self
                .store
                .scan(&opts.table, &opts.field, offset, batch_size)
                .await
            {
                Ok(batch) => batch,
                Err(e) => {
                    error!(offset, class = e.class(), "scan failed, aborting run: {e}");
                    report.aborted = Some(e.to_string());
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }

            let mut committed = true;
            for row in &batch {
                committed &= self.process(row, opts, &mut report).await;
            }
            offset += batch.len();
            report.next_offset = offset;

            if committed {
                report.batches_committed += 1;
            } else {
                report.batches_failed += 1;
                contiguous = false;
            }
            info!(
                table = %opts.table,
                offset,
                batch = batch.len(),
                committed,
                migrated = report.records_migrated,
                "batch finished"
            );

            if let Some(p) = progress {
                p(
                    report.records_scanned,
                    report.batches_committed + report.batches_failed,
                    &format!("offset {offset}"),
                );
            }

            if opts.mode == MigrationMode::Execute && contiguous {
                if let Some(store) = checkpoint.as_deref_mut() {
                    store.set(&opts.table, &opts.field, offset, report.batches_committed);
                    if let Err(e) = store.flush() {
                        error!("checkpoint write failed, aborting run: {e:#}");
                        report.aborted = Some(format!("checkpoint: {e:#}"));
                        break;
                    }
                }
            }
        }

        if opts.mode == MigrationMode::Execute && report.is_success() {
            if let Some(store) = checkpoint {
                store.clear(&opts.table, &opts.field);
                if let Err(e) = store.flush() {
                    warn!("clearing finished checkpoint failed: {e:#}");
                }
            }
        }

        info!(
            table = %opts.table,
            field = %opts.field,
            scanned = report.records_scanned,
            migrated = report.records_migrated,
            would_migrate = report.records_would_migrate,
            skipped = report.records_skipped,
            failures = report.failures.len(),
            legacy_key_reads = report.legacy_key_reads,
            success = report.is_success(),
            "migration finished"
        );
        report
    }

    /// Returns false if a write this batch depends on failed.
    async fn process(
        &self,
        row: &FieldRecord,
        opts: &MigrationOptions,
        report: &mut MigrationReport,
    ) -> bool {
        let eval = match self.evaluate(row).await {
            Ok(eval) => eval,
            Err(e) => {
                warn!(
                    id = %row.id,
                    user_id = %row.user_id,
                    class = e.class(),
                    "cannot read record, skipping: {e}"
                );
                report.fail(&row.id, Outcome::DecryptFailed, &e);
                return true;
            }
        };
        count_scheme(report, eval.scheme);

        match eval.outcome {
            Outcome::WouldMigrate if opts.mode == MigrationMode::Execute => {
                let mut record = eval.record;
                match self
                    .store
                    .put_hash(
                        &opts.table,
                        &opts.field,
                        &record.id,
                        &record.current_hash,
                        &record.recomputed_hash,
                    )
                    .await
                {
                    Ok(true) => {
                        record.migrated = true;
                        debug!(id = %record.id, user_id = %record.user_id, "hash rewritten");
                        report.record(&record.id, Outcome::Migrated);
                        true
                    }
                    Ok(false) => {
                        report.record(&record.id, Outcome::Superseded);
                        true
                    }
                    Err(e) => {
                        warn!(id = %record.id, class = e.class(), "hash rewrite failed: {e}");
                        report.fail(&record.id, Outcome::WriteFailed, &e);
                        false
                    }
                }
            }
            Outcome::Anomalous => {
                warn!(
                    id = %row.id,
                    user_id = %row.user_id,
                    "stored hash matches neither scheme; leaving it untouched"
                );
                report.record(&row.id, Outcome::Anomalous);
                true
            }
            outcome => {
                report.record(&row.id, outcome);
                true
            }
        }
    }

    async fn validate(
        &self,
        opts: &MigrationOptions,
        progress: Option<&ProgressFn>,
    ) -> MigrationReport {
        let mut report =
            MigrationReport::new(&opts.table, &opts.field, MigrationMode::Validate, opts.start_offset);
        let batch_size = opts.batch_size.max(1);
        let target = opts.validate_sample as u64;
        let mut offset = opts.start_offset;
        let mut sampled = 0u64;
        let mut mismatches = 0u64;

        while sampled < target {
            if self.stop_requested() {
                report.stopped = true;
                break;
            }
            let limit = batch_size.min((target - sampled) as usize);
            let batch = match self.store.scan(&opts.table, &opts.field, offset, limit).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(offset, class = e.class(), "scan failed, aborting validation: {e}");
                    report.aborted = Some(e.to_string());
                    break;
                }
            };
            if batch.is_empty() {
                break;
            }
            offset += batch.len();

            for row in &batch {
                match self.evaluate(row).await {
                    Ok(eval) => {
                        count_scheme(&mut report, eval.scheme);
                        if eval.outcome != Outcome::Empty {
                            sampled += 1;
                            if eval.outcome != Outcome::AlreadySalted {
                                mismatches += 1;
                                debug!(id = %row.id, outcome = ?eval.outcome, "hash mismatch");
                            }
                        }
                        report.record(&row.id, eval.outcome);
                    }
                    Err(e) => {
                        warn!(id = %row.id, class = e.class(), "cannot read record: {e}");
                        report.fail(&row.id, Outcome::DecryptFailed, &e);
                    }
                }
            }

            if let Some(p) = progress {
                p(report.records_scanned, 0, &format!("sampled {sampled}/{target}"));
            }
        }

        report.next_offset = offset;
        report.sampled = Some(sampled);
        report.mismatches = Some(mismatches);
        let rate = if sampled == 0 {
            0.0
        } else {
            mismatches as f64 / sampled as f64
        };
        report.mismatch_rate = Some(rate);
        info!(
            table = %opts.table,
            field = %opts.field,
            sampled,
            mismatches,
            mismatch_rate = rate,
            "validation finished"
        );
        report
    }
}

fn count_scheme(report: &mut MigrationReport, scheme: Option<KeyType>) {
    match scheme {
        Some(KeyType::Fallback) => report.fallback_key_reads += 1,
        Some(KeyType::Legacy) => report.legacy_key_reads += 1,
        _ => {}
    }
}
