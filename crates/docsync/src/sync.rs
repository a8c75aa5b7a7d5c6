//! Run orchestration
//!
//! One [`FileSync::run`] reconciles, then prepares and persists candidates one
//! batch at a time: all updates first, then all creates. Batches are written
//! strictly in order; preparation inside a batch may run concurrently.
//!
//! A failed batch never leaves partial writes behind. What happens to the
//! batches after it is decided by [`BatchFailurePolicy`].

use serde::Serialize;
use tracing::{error, info, instrument, warn};

use crate::catalog::{CatalogStore, CatalogWriter};
use crate::config::{BatchFailurePolicy, RunConfig};
use crate::error::{SyncError, SyncResult};
use crate::ingest::{IngestPipeline, Workspace};
use crate::inventory::InventorySource;
use crate::reconcile::{ReconcileReport, Reconciler};
use crate::transcode::Transcoder;

/// A batch that was rolled back while the run went on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedBatch {
    pub batch: usize,
    pub files: Vec<String>,
    pub error: String,
}

/// Totals of a run that reached the write stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub updated: usize,
    pub created: usize,
    pub linked: usize,
    pub committed_batches: usize,
    /// Only populated under [`BatchFailurePolicy::Continue`]
    pub failed_batches: Vec<FailedBatch>,
}

#[derive(Debug)]
pub enum SyncOutcome {
    /// No candidate survived reconciliation; nothing was fetched or written
    NothingToDo(ReconcileReport),
    Completed {
        report: ReconcileReport,
        summary: RunSummary,
    },
}

pub struct FileSync<'a, C: CatalogStore> {
    inventory: &'a dyn InventorySource,
    catalog: &'a C,
    transcoder: &'a dyn Transcoder,
    config: RunConfig,
}

impl<'a, C: CatalogStore> FileSync<'a, C> {
    pub fn new(
        inventory: &'a dyn InventorySource,
        catalog: &'a C,
        transcoder: &'a dyn Transcoder,
        config: RunConfig,
    ) -> Self {
        Self {
            inventory,
            catalog,
            transcoder,
            config,
        }
    }

    /// Classify without fetching or writing anything
    pub async fn plan(&self) -> SyncResult<ReconcileReport> {
        Reconciler::new(self.inventory, self.catalog).reconcile().await
    }

    /// Reconcile, ingest and persist
    ///
    /// The workspace is wiped before the run and again afterwards, whatever
    /// the result.
    #[instrument(skip(self), fields(work_dir = %self.config.work_dir.display()))]
    pub async fn run(&self) -> SyncResult<SyncOutcome> {
        let workspace = Workspace::new(&self.config.work_dir);
        workspace.prepare().await?;

        let result = self.run_in(&workspace).await;

        if let Err(e) = workspace.clear().await {
            warn!(error = %e, path = %workspace.root().display(), "Failed to clear workspace");
        }
        result
    }

    async fn run_in(&self, workspace: &Workspace) -> SyncResult<SyncOutcome> {
        let report = self.plan().await?;
        if !report.has_work() {
            info!("Nothing to do");
            return Ok(SyncOutcome::NothingToDo(report));
        }

        let pipeline = IngestPipeline::new(
            self.inventory,
            self.transcoder,
            workspace,
            self.config.fetch_concurrency,
        );
        let writer = CatalogWriter::new(self.catalog, self.config.batch_size);
        let mut summary = RunSummary::default();
        let mut batch = 0;

        for candidates in report.updates.chunks(writer.batch_size()) {
            batch += 1;
            let result = async {
                let files = pipeline.prepare_updates(candidates).await?;
                writer.write_updates(batch, &files).await
            }
            .await;

            match result {
                Ok(updated) => {
                    summary.updated += updated as usize;
                    summary.committed_batches += 1;
                },
                Err(e) => {
                    let names = candidates.iter().map(|c| c.remote_name.clone()).collect();
                    self.on_batch_failure(batch, names, e, &mut summary)?;
                },
            }
        }

        for candidates in report.creates.chunks(writer.batch_size()) {
            batch += 1;
            let result = async {
                let files = pipeline.prepare_creates(candidates).await?;
                writer.write_creates(batch, &files).await
            }
            .await;

            match result {
                Ok(inserted) => {
                    summary.created += inserted.len();
                    summary.linked += inserted.len();
                    summary.committed_batches += 1;
                },
                Err(e) => {
                    let names = candidates.iter().map(|c| c.remote_name.clone()).collect();
                    self.on_batch_failure(batch, names, e, &mut summary)?;
                },
            }
        }

        info!(
            updated = summary.updated,
            created = summary.created,
            linked = summary.linked,
            committed_batches = summary.committed_batches,
            failed_batches = summary.failed_batches.len(),
            "Sync run complete"
        );
        Ok(SyncOutcome::Completed { report, summary })
    }

    fn on_batch_failure(
        &self,
        batch: usize,
        files: Vec<String>,
        err: SyncError,
        summary: &mut RunSummary,
    ) -> SyncResult<()> {
        if !err.is_batch_scoped() {
            return Err(err);
        }

        match self.config.on_batch_failure {
            BatchFailurePolicy::Stop => {
                error!(
                    batch,
                    error = %err,
                    committed_batches = summary.committed_batches,
                    "Batch failed, stopping run"
                );
                Err(err)
            },
            BatchFailurePolicy::Continue => {
                warn!(batch, error = %err, "Batch failed, continuing with next batch");
                summary.failed_batches.push(FailedBatch {
                    batch,
                    files,
                    error: err.to_string(),
                });
                Ok(())
            },
        }
    }
}
