//! Docsync Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Keeps catalog file attachments in step with a remote document inventory.
//!
//! A run lists the inventory, matches remote names to catalog items by
//! business key, and classifies each name as already stored, an update of a
//! stored file, or a new file. New and updated files are fetched, converted
//! to PDF where needed, and written in small transactional batches; new files
//! are linked to their item.
//!
//! # Modules
//!
//! - **naming**: business key and version token parsing, version ordering
//! - **inventory**: the [`InventorySource`] seam, its FTP implementation and
//!   the per-run [`WorkingSet`]
//! - **catalog**: the catalog seams, the Postgres store and the batch writer
//! - **reconcile**: the classification stages
//! - **transcode**: external PDF conversion
//! - **ingest**: fetch and convert candidates inside the run workspace
//! - **sync**: the run orchestrator
//!
//! # Example
//!
//! ```no_run
//! use docsync::{FileSync, FtpInventory, OfficeTranscoder, PgCatalog, SyncConfig, SyncOutcome};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = SyncConfig::load()?;
//!     let catalog = PgCatalog::connect(&config.database).await?;
//!     let inventory = FtpInventory::new(config.ftp.clone());
//!     let transcoder = OfficeTranscoder::new(config.transcoder.clone());
//!
//!     let sync = FileSync::new(&inventory, &catalog, &transcoder, config.run.clone());
//!     if let SyncOutcome::Completed { summary, .. } = sync.run().await? {
//!         println!("{} created, {} updated", summary.created, summary.updated);
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod error;
pub mod ingest;
pub mod inventory;
pub mod naming;
pub mod reconcile;
pub mod sync;
pub mod transcode;

// Re-export commonly used types
pub use catalog::{CatalogReader, CatalogStore, CatalogWriter, PgCatalog};
pub use config::{BatchFailurePolicy, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use ingest::{IngestPipeline, Workspace};
pub use inventory::{FtpInventory, InventorySource, WorkingSet};
pub use reconcile::{CreateCandidate, ReconcileReport, Reconciler, UpdateCandidate};
pub use sync::{FileSync, RunSummary, SyncOutcome};
pub use transcode::{OfficeTranscoder, Transcoder};
