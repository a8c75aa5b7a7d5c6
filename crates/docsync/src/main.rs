//! Docsync - catalog attachment sync

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use docsync::{FileSync, FtpInventory, OfficeTranscoder, PgCatalog, SyncConfig, SyncOutcome};
use docsync_common::env::ProcessEnv;
use docsync_common::logging::{init_logging, LogConfig, LogLevel};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "docsync")]
#[command(author, version, about = "Sync remote documents into catalog file attachments")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Reconcile, fetch, convert and persist
    Run,

    /// Show how the current inventory would be classified, without writing
    Plan {
        /// Print the classification as JSON
        #[arg(long)]
        json: bool,
    },
}

impl Cli {
    /// Console log level before environment overrides
    ///
    /// `plan --json` keeps quiet so its output can be piped.
    fn log_level(&self) -> LogLevel {
        match self.command {
            _ if self.verbose => LogLevel::Debug,
            Command::Plan { json: true } => LogLevel::Warn,
            _ => LogLevel::Info,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();

    // Environment variables take precedence
    let log_config = LogConfig::builder()
        .level(cli.log_level())
        .log_file_prefix("docsync")
        .build()
        .merge_env(&ProcessEnv)?;

    let _guard = init_logging(&log_config)?;

    let config = SyncConfig::load().context("Invalid configuration")?;
    info!(
        ftp_host = %config.ftp.host,
        ftp_dir = %config.ftp.directory,
        batch_size = config.run.batch_size,
        on_batch_failure = ?config.run.on_batch_failure,
        "Configuration loaded"
    );

    let catalog = PgCatalog::connect(&config.database).await?;
    let inventory = FtpInventory::new(config.ftp.clone());
    let transcoder = OfficeTranscoder::new(config.transcoder.clone());
    let sync = FileSync::new(&inventory, &catalog, &transcoder, config.run.clone());

    match cli.command {
        Command::Plan { json } => {
            let report = sync.plan().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for update in &report.updates {
                    println!("update  {} (file {})", update.remote_name, update.file_id);
                }
                for create in &report.creates {
                    println!("create  {} (item {})", create.remote_name, create.item_id);
                }
                println!(
                    "{} updates, {} creates, {} already stored, {} not newer, {} unmatched, {} ignored, {} superseded",
                    report.updates.len(),
                    report.creates.len(),
                    report.already_stored.len(),
                    report.not_newer.len(),
                    report.unmatched.len(),
                    report.ignored.len(),
                    report.superseded.len(),
                );
            }
        },
        Command::Run => match sync.run().await? {
            SyncOutcome::NothingToDo(_) => {
                println!("Nothing to do");
            },
            SyncOutcome::Completed { summary, .. } => {
                println!(
                    "{} updated, {} created, {} linked in {} batches",
                    summary.updated, summary.created, summary.linked, summary.committed_batches
                );
                if !summary.failed_batches.is_empty() {
                    for failed in &summary.failed_batches {
                        eprintln!("batch {} failed: {}", failed.batch, failed.error);
                    }
                    anyhow::bail!("{} batches failed", summary.failed_batches.len());
                }
            },
        },
    }

    Ok(())
}
