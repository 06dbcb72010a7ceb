use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cloak_core::{CloakConfig, EncryptionService, HttpKeyService};
use cloak_migrate::{census, JsonlStore, MigrateOptions, Migrator};

#[derive(Parser)]
#[command(name = "cloak-migrate")]
#[command(about = "Re-encrypt legacy and plaintext rows into the current envelope format", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify rows without touching the key service or writing anything
    Scan {
        /// Newline-delimited JSON export, one record per line
        #[arg(long)]
        store: PathBuf,
    },
    /// Re-encrypt every non-envelope row through the encryption service
    Run {
        /// Newline-delimited JSON export, one record per line
        #[arg(long)]
        store: PathBuf,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,

        /// Records re-encrypted between persists
        #[arg(long, default_value_t = 100)]
        batch_size: usize,

        /// Retries per record on key service failure
        #[arg(long, default_value_t = 5)]
        max_retries: u32,

        /// Stop after this many re-encryptions
        #[arg(long)]
        limit: Option<usize>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Scan { store } => {
            let report = census(&JsonlStore::new(store)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Run {
            store,
            dry_run,
            batch_size,
            max_retries,
            limit,
        } => {
            let config = CloakConfig::from_env()?;
            let keys = Arc::new(HttpKeyService::new(config.key_service.clone())?);
            let service = EncryptionService::new(keys, &config)?;
            let migrator = Migrator::new(
                service,
                MigrateOptions {
                    dry_run,
                    batch_size,
                    max_retries,
                    limit,
                },
            );
            let report = migrator.run(&JsonlStore::new(store)).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report.failed > 0 {
                anyhow::bail!("{} records failed to re-encrypt", report.failed);
            }
        }
    }
    Ok(())
}
