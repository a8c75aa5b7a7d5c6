//! Error taxonomy for a sync run
//!
//! Only conditions that stop a stage surface here. Inventory names without a
//! catalog item, stored titles outside the naming scheme and failed
//! conversions are not errors; they end up in the reconciliation report or in
//! the fallback path of the ingest pipeline.

use thiserror::Error;

/// Result type alias for sync operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

#[derive(Error, Debug)]
pub enum SyncError {
    /// The inventory listing could not be produced
    #[error("Inventory source unavailable: {0:#}")]
    InventoryUnavailable(#[source] anyhow::Error),

    /// A catalog read failed before any write took place
    #[error("Catalog store unavailable: {0:#}")]
    CatalogUnavailable(#[source] anyhow::Error),

    #[error("Failed to fetch {name} from inventory: {source:#}")]
    Fetch {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    /// A write batch was rolled back
    #[error("Batch {batch} failed to persist: {source:#}")]
    Persistence {
        batch: usize,
        #[source]
        source: anyhow::Error,
    },

    #[error("Batch {batch} returned {returned} file ids for {submitted} inserted files")]
    IdCountMismatch {
        batch: usize,
        submitted: usize,
        returned: usize,
    },

    #[error("Workspace error: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] docsync_common::ConfigError),
}

impl SyncError {
    /// Whether the failure is confined to one write batch
    pub fn is_batch_scoped(&self) -> bool {
        matches!(
            self,
            SyncError::Fetch { .. } | SyncError::Persistence { .. } | SyncError::IdCountMismatch { .. }
        )
    }
}
