//! Fetch and convert classified candidates
//!
//! [`IngestPipeline`] turns candidate names into final payloads. Files that
//! are not PDF yet go through the [`Transcoder`] inside a private scratch
//! directory of the run [`Workspace`]; when no converted file comes out, the
//! original bytes and name are kept so the file can be fixed up by hand.
//!
//! Candidates of one batch are prepared concurrently. Results always come
//! back in candidate order.

use futures::stream::{self, StreamExt, TryStreamExt};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info, instrument, warn};

use crate::catalog::{FileContent, FileUpdate, NewFile};
use crate::error::{SyncError, SyncResult};
use crate::inventory::InventorySource;
use crate::naming;
use crate::reconcile::{CreateCandidate, UpdateCandidate};
use crate::transcode::{is_portable, Transcoder, PORTABLE_EXTENSION};

/// Neutral stem the converter input is staged under
pub const STAGED_STEM: &str = "transcode_in";

/// Directory below the configured work dir that a run owns
pub const RUN_DIR_NAME: &str = "docsync-run";

/// Scratch area owned by one run
///
/// The run owns only [`RUN_DIR_NAME`] inside the configured work dir; the
/// work dir itself and anything else in it are never removed. Only one run
/// may use a given work dir at a time.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(work_dir: impl AsRef<Path>) -> Self {
        Self {
            root: work_dir.as_ref().join(RUN_DIR_NAME),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Start from an empty directory
    pub async fn prepare(&self) -> io::Result<()> {
        self.clear().await?;
        tokio::fs::create_dir_all(&self.root).await?;
        debug!(path = %self.root.display(), "Workspace ready");
        Ok(())
    }

    /// Remove the run directory and everything in it
    pub async fn clear(&self) -> io::Result<()> {
        match tokio::fs::remove_dir_all(&self.root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// A fresh sub-directory, deleted when the handle drops
    pub fn scratch(&self) -> io::Result<TempDir> {
        tempfile::Builder::new()
            .prefix("candidate-")
            .tempdir_in(&self.root)
    }
}

pub struct IngestPipeline<'a> {
    inventory: &'a dyn InventorySource,
    transcoder: &'a dyn Transcoder,
    workspace: &'a Workspace,
    concurrency: usize,
}

impl<'a> IngestPipeline<'a> {
    pub fn new(
        inventory: &'a dyn InventorySource,
        transcoder: &'a dyn Transcoder,
        workspace: &'a Workspace,
        concurrency: usize,
    ) -> Self {
        Self {
            inventory,
            transcoder,
            workspace,
            concurrency: concurrency.max(1),
        }
    }

    /// Final title and bytes for one remote file
    #[instrument(skip(self))]
    pub async fn prepare(&self, name: &str) -> SyncResult<FileContent> {
        let bytes = self
            .inventory
            .fetch(name)
            .await
            .map_err(|source| SyncError::Fetch {
                name: name.to_string(),
                source,
            })?;
        debug!(bytes = bytes.len(), "Fetched remote file");

        let original = FileContent {
            title: name.to_string(),
            bytes,
        };
        if is_portable(name) {
            return Ok(original);
        }
        let Some(ext) = naming::extension(name) else {
            return Ok(original);
        };

        let scratch = self.workspace.scratch()?;
        let staged = scratch.path().join(format!("{STAGED_STEM}.{ext}"));
        tokio::fs::write(&staged, &original.bytes).await?;

        let output = self.transcoder.transcode(&staged, scratch.path()).await;
        if !tokio::fs::try_exists(&output).await.unwrap_or(false) {
            warn!(output = %output.display(), "Conversion produced no output, keeping original file");
            return Ok(original);
        }

        let converted = tokio::fs::read(&output).await?;
        let title = naming::with_extension(name, PORTABLE_EXTENSION);
        info!(title = %title, bytes = converted.len(), "Converted to PDF");
        Ok(FileContent {
            title,
            bytes: converted,
        })
    }

    /// Prepare several files concurrently, keeping their order
    pub async fn prepare_all<'n, I>(&self, names: I) -> SyncResult<Vec<FileContent>>
    where
        I: IntoIterator<Item = &'n str>,
    {
        stream::iter(names)
            .map(|name| self.prepare(name))
            .buffered(self.concurrency)
            .try_collect()
            .await
    }

    pub async fn prepare_updates(&self, batch: &[UpdateCandidate]) -> SyncResult<Vec<FileUpdate>> {
        let contents = self
            .prepare_all(batch.iter().map(|c| c.remote_name.as_str()))
            .await?;
        Ok(batch
            .iter()
            .zip(contents)
            .map(|(candidate, content)| FileUpdate {
                file_id: candidate.file_id,
                content,
            })
            .collect())
    }

    pub async fn prepare_creates(&self, batch: &[CreateCandidate]) -> SyncResult<Vec<NewFile>> {
        let contents = self
            .prepare_all(batch.iter().map(|c| c.remote_name.as_str()))
            .await?;
        Ok(batch
            .iter()
            .zip(contents)
            .map(|(candidate, content)| NewFile {
                item_id: candidate.item_id,
                content,
            })
            .collect())
    }
}
