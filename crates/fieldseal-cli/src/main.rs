//! fieldseal: operator CLI
//!
//! Commands:
//!   migrate --table T --field F [--dry-run | --validate] [--batch-size N] [--resume]
//!                                - rewrite legacy search hashes to the salted scheme
//!   search --table T --field F --user U TEXT
//!                                - find U's rows whose field equals TEXT and print them
//!   hash --user U TEXT           - print the salted and legacy search hashes for TEXT
//!   config show                  - display current configuration
//!
//! `migrate` exits 0 only when every batch committed and the table was fully
//! scanned; otherwise it exits 1 after printing the summary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fieldseal_core::config::{expand_tilde, FieldsealConfig};
use fieldseal_crypto::{EncryptionEngine, SearchHashEngine};
use fieldseal_migrate::{
    CheckpointStore, FieldSearch, HashMigrationService, MigrationMode, MigrationOptions,
    MigrationReport, ProgressFn,
};
use fieldseal_storage::{OpendalRecordStore, RecordStore};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "fieldseal",
    version,
    about = "fieldseal operator tools",
    long_about = "fieldseal: search-hash migration and diagnostics for encrypted text fields"
)]
struct Cli {
    /// Path to fieldseal.toml configuration file
    #[arg(long, short = 'c', env = "FIELDSEAL_CONFIG", default_value = "/etc/fieldseal/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FIELDSEAL_LOG", default_value = "warn")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "FIELDSEAL_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rewrite legacy unsalted search hashes to the per-user salted scheme
    ///
    /// Key material comes from the environment variable named by
    /// `[keys] secret_env`, or from the boundary in an untrusted context.
    Migrate {
        /// Table (storage prefix) to scan
        #[arg(long)]
        table: String,
        /// Text field whose `<field>_hash` column is migrated
        #[arg(long)]
        field: String,
        /// Decide every record and report, but write nothing
        #[arg(long, conflicts_with = "validate")]
        dry_run: bool,
        /// Sample records and report the share still on the legacy scheme
        #[arg(long)]
        validate: bool,
        /// Records per batch (overrides config)
        #[arg(long)]
        batch_size: Option<usize>,
        /// Continue from the checkpoint left by an interrupted run
        #[arg(long)]
        resume: bool,
        /// Row offset to start from
        #[arg(long, default_value_t = 0)]
        start_offset: usize,
        /// Checkpoint file (overrides config)
        #[arg(long, env = "FIELDSEAL_CHECKPOINT")]
        checkpoint: Option<PathBuf>,
        /// Print only the JSON summary
        #[arg(long)]
        json: bool,
    },

    /// Find a user's rows whose field equals TEXT and print them decrypted
    ///
    /// Rows not yet migrated are matched through the legacy hash.
    Search {
        /// Table (storage prefix) to search
        #[arg(long)]
        table: String,
        /// Text field to match on
        #[arg(long)]
        field: String,
        /// Owner of the rows
        #[arg(long)]
        user: String,
        text: String,
    },

    /// Print the search hashes a query for TEXT would use
    Hash {
        /// User id the salt is derived from
        #[arg(long)]
        user: String,
        text: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(&cli.log, &cli.log_format);
    let config = FieldsealConfig::load(&cli.config)?;

    match cli.command {
        Commands::Migrate {
            table,
            field,
            dry_run,
            validate,
            batch_size,
            resume,
            start_offset,
            checkpoint,
            json,
        } => {
            let mode = if validate {
                MigrationMode::Validate
            } else if dry_run {
                MigrationMode::DryRun
            } else {
                MigrationMode::Execute
            };
            let mut opts = MigrationOptions::from_config(table, field, &config.migration).mode(mode);
            if let Some(n) = batch_size {
                opts = opts.batch_size(n);
            }
            opts.resume = resume;
            opts.start_offset = start_offset;

            let report = cmd_migrate(&config, &opts, checkpoint.as_deref(), json).await?;
            Ok(if report.is_success() {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Search {
            table,
            field,
            user,
            text,
        } => cmd_search(&config, &table, &field, &user, &text).await,
        Commands::Hash { user, text } => {
            cmd_hash(&user, &text)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config {
            action: ConfigAction::Show,
        } => {
            cmd_config_show(&config, &cli.config)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Progress helpers ──────────────────────────────────────────────────────────

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {pos} records {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

// ── `fieldseal migrate` ───────────────────────────────────────────────────────

/// Engine and record store from config; the store must answer a ping.
async fn open_backends(
    config: &FieldsealConfig,
) -> Result<(Arc<EncryptionEngine>, Arc<dyn RecordStore>)> {
    let engine = EncryptionEngine::from_config(&config.keys).context("configuring encryption")?;
    let op = fieldseal_storage::build_from_config(&config.storage)?;
    let store: Arc<dyn RecordStore> = Arc::new(OpendalRecordStore::new(op));
    store
        .ping()
        .await
        .with_context(|| format!("storage backend {:?} unreachable", config.storage.backend))?;
    Ok((Arc::new(engine), store))
}

async fn cmd_migrate(
    config: &FieldsealConfig,
    opts: &MigrationOptions,
    checkpoint_override: Option<&Path>,
    json_only: bool,
) -> Result<MigrationReport> {
    let (engine, store) = open_backends(config).await?;

    let checkpoint_path = checkpoint_override
        .map(Path::to_path_buf)
        .unwrap_or_else(|| expand_tilde(&config.migration.checkpoint_file));
    let mut checkpoint = CheckpointStore::open(&checkpoint_path)?;

    let service = HashMigrationService::new(engine, store);

    let stop = service.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received; stopping after the current batch");
            stop.store(true, Ordering::SeqCst);
        }
    });

    if !json_only {
        eprintln!(
            "Migrating {}.{}_hash ({:?}, batch size {}, checkpoint {})",
            opts.table,
            opts.field,
            opts.mode,
            opts.batch_size,
            checkpoint.path().display(),
        );
    }

    let pb = (!json_only).then(|| make_spinner("migrate"));
    let progress: Option<ProgressFn> = pb.clone().map(|pb| {
        Box::new(move |scanned: u64, batches: u64, msg: &str| {
            pb.set_position(scanned);
            pb.set_message(format!("({batches} batches, {msg})"));
        }) as ProgressFn
    });

    let report = service
        .migrate_table(opts, Some(&mut checkpoint), progress.as_ref())
        .await;

    if let Some(pb) = pb {
        pb.finish_with_message("done".to_string());
        print_human_summary(&report);
    }
    println!("{}", report.to_json().context("serializing report")?);
    Ok(report)
}

fn print_human_summary(report: &MigrationReport) {
    eprintln!();
    eprintln!("Migration {}:", if report.is_success() { "complete" } else { "incomplete" });
    eprintln!("  scanned:        {}", report.records_scanned);
    match report.mode {
        MigrationMode::DryRun => eprintln!("  would migrate:  {}", report.records_would_migrate),
        _ => eprintln!("  migrated:       {}", report.records_migrated),
    }
    eprintln!("  skipped:        {}", report.records_skipped);
    eprintln!("  anomalous:      {}", report.records_anomalous);
    eprintln!("  decrypt errors: {}", report.decrypt_failures);
    eprintln!("  write errors:   {}", report.write_failures);
    if let Some(rate) = report.mismatch_rate {
        eprintln!("  mismatch rate:  {:.2}%", rate * 100.0);
    }
    eprintln!(
        "  batches:        {} committed, {} failed",
        report.batches_committed, report.batches_failed
    );
    if report.stopped {
        eprintln!("  stopped at offset {}; rerun with --resume", report.next_offset);
    }
    if let Some(reason) = &report.aborted {
        eprintln!("  aborted: {reason}");
    }
}

// ── `fieldseal search` ────────────────────────────────────────────────────────

/// Exits 1 when any matching row failed to decrypt.
async fn cmd_search(
    config: &FieldsealConfig,
    table: &str,
    field: &str,
    user: &str,
    text: &str,
) -> Result<ExitCode> {
    let (engine, store) = open_backends(config).await?;
    let results = FieldSearch::new(engine, store)
        .search(table, field, text, user)
        .await
        .with_context(|| format!("searching {table}.{field}"))?;

    match results.term {
        Some(term) => eprintln!("{} row(s) matched the {term} hash", results.hits.len()),
        None => eprintln!("no rows matched"),
    }
    for hit in &results.hits {
        match &hit.result {
            Ok(plaintext) => println!("{}\t{plaintext}", hit.id),
            Err(e) => eprintln!("{}\t<{}: {e}>", hit.id, e.class()),
        }
    }
    Ok(if results.failures() == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

// ── `fieldseal hash` ──────────────────────────────────────────────────────────

fn cmd_hash(user: &str, text: &str) -> Result<()> {
    let [salted, legacy] = SearchHashEngine::new().search_terms(text, user)?;
    println!("salted: {salted}");
    println!("legacy: {legacy}");
    Ok(())
}

// ── `fieldseal config show` ───────────────────────────────────────────────────

fn cmd_config_show(config: &FieldsealConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
