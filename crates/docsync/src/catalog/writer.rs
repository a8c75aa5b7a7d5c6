//! Batched catalog writes
//!
//! Every batch runs in its own transaction. A failing statement rolls back
//! its batch only; batches committed earlier stay committed.
//!
//! Inserted files get their ids from the store in submission order and the
//! writer pairs them back by position, so a batch must reach the store in the
//! order it was built.

use chrono::Utc;
use tracing::{debug, info, instrument};

use super::{CatalogStore, FileId, FileUpdate, ItemId, LinkRecord, NewFile};
use crate::error::{SyncError, SyncResult};

/// A file that now exists in the catalog, linked to its item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertedFile {
    pub file_id: FileId,
    pub item_id: ItemId,
    pub title: String,
}

/// Pair generated ids with the files they were generated for
///
/// The k-th id belongs to the k-th submitted file. A count mismatch means the
/// correspondence is broken and the batch must not be linked.
pub fn assign_file_ids(
    batch: usize,
    files: &[NewFile],
    ids: Vec<FileId>,
) -> SyncResult<Vec<InsertedFile>> {
    if ids.len() != files.len() {
        return Err(SyncError::IdCountMismatch {
            batch,
            submitted: files.len(),
            returned: ids.len(),
        });
    }

    Ok(files
        .iter()
        .zip(ids)
        .map(|(file, file_id)| InsertedFile {
            file_id,
            item_id: file.item_id,
            title: file.content.title.clone(),
        })
        .collect())
}

/// Writes prepared files to a [`CatalogStore`] one batch at a time
pub struct CatalogWriter<'a> {
    store: &'a dyn CatalogStore,
    batch_size: usize,
}

impl<'a> CatalogWriter<'a> {
    pub fn new(store: &'a dyn CatalogStore, batch_size: usize) -> Self {
        Self {
            store,
            batch_size: batch_size.max(1),
        }
    }

    /// Maximum number of files per transaction
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Overwrite existing files in one transaction
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn write_updates(&self, batch: usize, files: &[FileUpdate]) -> SyncResult<u64> {
        if files.is_empty() {
            return Ok(0);
        }
        let persistence = |source| SyncError::Persistence { batch, source };

        let mut tx = self.store.begin().await.map_err(persistence)?;
        let updated = tx.update_files(files).await.map_err(persistence)?;
        tx.commit().await.map_err(persistence)?;

        info!(batch, updated, "Update batch committed");
        Ok(updated)
    }

    /// Insert new files and link each to its item in one transaction
    ///
    /// Returns the inserted files carrying their generated ids.
    #[instrument(skip(self, files), fields(files = files.len()))]
    pub async fn write_creates(
        &self,
        batch: usize,
        files: &[NewFile],
    ) -> SyncResult<Vec<InsertedFile>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let persistence = |source| SyncError::Persistence { batch, source };

        let mut tx = self.store.begin().await.map_err(persistence)?;
        let ids = tx.insert_files(files).await.map_err(persistence)?;
        let inserted = assign_file_ids(batch, files, ids)?;

        let created_at = Utc::now();
        let links: Vec<LinkRecord> = inserted
            .iter()
            .map(|file| LinkRecord::item_file(file.item_id, file.file_id, created_at))
            .collect();
        let linked = tx.insert_links(&links).await.map_err(persistence)?;
        tx.commit().await.map_err(persistence)?;

        debug!(batch, ids = ?inserted.iter().map(|f| f.file_id).collect::<Vec<_>>(), "Assigned file ids");
        info!(batch, inserted = inserted.len(), linked, "Create batch committed");
        Ok(inserted)
    }
}
