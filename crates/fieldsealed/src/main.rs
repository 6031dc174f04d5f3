//! fieldsealed: fieldseal trusted-context daemon
//!
//! Usage:
//!   fieldsealed [--config /etc/fieldseal/config.toml]
//!
//! The trusted secret is read from the environment variable named by
//! `[keys] secret_env` (default `KEY_MATERIAL`), never from the config file.

use anyhow::Result;
use clap::{Parser, ValueEnum};
use fieldseal_core::config::FieldsealConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "fieldsealed", version, about = "fieldseal key issuance daemon")]
struct Cli {
    /// Path to fieldseal.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "FIELDSEAL_CONFIG",
        default_value = "/etc/fieldseal/config.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "FIELDSEAL_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "FIELDSEAL_LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "fieldsealed starting"
    );

    let config = FieldsealConfig::load(&cli.config)?;
    fieldsealed::daemon::run(config).await
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}
