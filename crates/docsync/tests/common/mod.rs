//! In-memory collaborators for integration tests
#![allow(dead_code)]

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use docsync::catalog::{
    CatalogItem, CatalogReader, CatalogStore, CatalogTransaction, FileId, FileUpdate, ItemId,
    LinkRecord, NewFile, StoredFile, TitlePattern,
};
use docsync::config::{BatchFailurePolicy, RunConfig};
use docsync::{InventorySource, Transcoder};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,docsync=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn run_config(work_dir: &Path) -> RunConfig {
    RunConfig {
        work_dir: work_dir.join("temp_files"),
        batch_size: 5,
        fetch_concurrency: 3,
        on_batch_failure: BatchFailurePolicy::Stop,
    }
}

// ============================================================================
// Inventory
// ============================================================================

#[derive(Default)]
pub struct MemoryInventory {
    files: Vec<(String, Vec<u8>)>,
    unavailable: bool,
    broken: HashSet<String>,
    fetched: Mutex<Vec<String>>,
}

impl MemoryInventory {
    pub fn with_files<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let files = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                let bytes = format!("content of {name}").into_bytes();
                (name, bytes)
            })
            .collect();
        Self {
            files,
            ..Self::default()
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }

    /// Fetches of `name` fail
    pub fn break_file(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().map(|f| f.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InventorySource for MemoryInventory {
    async fn list(&self) -> Result<Vec<String>> {
        if self.unavailable {
            bail!("connection refused");
        }
        Ok(self.files.iter().map(|(name, _)| name.clone()).collect())
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        if self.unavailable || self.broken.contains(name) {
            bail!("550 {name}: transfer failed");
        }
        if let Ok(mut fetched) = self.fetched.lock() {
            fetched.push(name.to_string());
        }
        self.files
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, bytes)| bytes.clone())
            .ok_or_else(|| anyhow!("550 {name}: no such file"))
    }
}

// ============================================================================
// Catalog
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRow {
    pub file_id: FileId,
    pub title: String,
    pub description: String,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Default)]
struct CatalogState {
    items: Vec<CatalogItem>,
    files: BTreeMap<FileId, FileRow>,
    links: Vec<LinkRecord>,
    next_file_id: FileId,
}

/// Catalog with copy-on-begin transactions
///
/// Failures can be injected per transaction number (1-based, counted across
/// the catalog's lifetime); a failing transaction errors on its last
/// statement so its earlier statements must be rolled back.
pub struct MemoryCatalog {
    state: Arc<Mutex<CatalogState>>,
    transactions: AtomicUsize,
    failing: HashSet<usize>,
    drop_returned_id: bool,
    unavailable: bool,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(CatalogState {
                next_file_id: 1,
                ..CatalogState::default()
            })),
            transactions: AtomicUsize::new(0),
            failing: HashSet::new(),
            drop_returned_id: false,
            unavailable: false,
        }
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::new()
        }
    }

    pub fn with_item(self, item_id: ItemId, item_number: &str) -> Self {
        self.state.lock().unwrap().items.push(CatalogItem {
            item_id,
            item_number: item_number.to_string(),
        });
        self
    }

    pub fn with_file(self, file_id: FileId, title: &str) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            state.files.insert(
                file_id,
                FileRow {
                    file_id,
                    title: title.to_string(),
                    description: docsync::naming::describe(title),
                    bytes: b"stored".to_vec(),
                },
            );
            state.next_file_id = state.next_file_id.max(file_id + 1);
        }
        self
    }

    /// Make the n-th transaction fail
    pub fn fail_transaction(mut self, n: usize) -> Self {
        self.failing.insert(n);
        self
    }

    /// Return one id fewer than the number of inserted files
    pub fn drop_returned_id(mut self) -> Self {
        self.drop_returned_id = true;
        self
    }

    pub fn files(&self) -> Vec<FileRow> {
        self.state.lock().unwrap().files.values().cloned().collect()
    }

    pub fn file(&self, file_id: FileId) -> Option<FileRow> {
        self.state.lock().unwrap().files.get(&file_id).cloned()
    }

    pub fn links(&self) -> Vec<LinkRecord> {
        self.state.lock().unwrap().links.clone()
    }

    pub fn transactions_started(&self) -> usize {
        self.transactions.load(Ordering::SeqCst)
    }

    fn matching(&self, pattern: &TitlePattern) -> Result<Vec<FileRow>> {
        if self.unavailable {
            bail!("database is down");
        }
        let state = self.state.lock().map_err(|_| anyhow!("poisoned"))?;
        Ok(state
            .files
            .values()
            .filter(|row| pattern.matches(&row.title))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CatalogReader for MemoryCatalog {
    async fn select_items(&self) -> Result<Vec<CatalogItem>> {
        if self.unavailable {
            bail!("database is down");
        }
        Ok(self.state.lock().map_err(|_| anyhow!("poisoned"))?.items.clone())
    }

    async fn select_file_titles(&self, pattern: &TitlePattern) -> Result<Vec<String>> {
        Ok(self.matching(pattern)?.into_iter().map(|row| row.title).collect())
    }

    async fn select_files(&self, pattern: &TitlePattern) -> Result<Vec<StoredFile>> {
        Ok(self
            .matching(pattern)?
            .into_iter()
            .map(|row| StoredFile {
                file_id: row.file_id,
                title: row.title,
            })
            .collect())
    }
}

#[async_trait]
impl CatalogStore for MemoryCatalog {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>> {
        let number = self.transactions.fetch_add(1, Ordering::SeqCst) + 1;
        let staged = self.state.lock().map_err(|_| anyhow!("poisoned"))?.clone();
        Ok(Box::new(MemoryTransaction {
            shared: Arc::clone(&self.state),
            staged,
            fail: self.failing.contains(&number),
            drop_returned_id: self.drop_returned_id,
        }))
    }
}

struct MemoryTransaction {
    shared: Arc<Mutex<CatalogState>>,
    staged: CatalogState,
    fail: bool,
    drop_returned_id: bool,
}

#[async_trait]
impl CatalogTransaction for MemoryTransaction {
    async fn update_files(&mut self, files: &[FileUpdate]) -> Result<u64> {
        if self.fail {
            bail!("deadlock detected");
        }
        let mut updated = 0;
        for update in files {
            if let Some(row) = self.staged.files.get_mut(&update.file_id) {
                row.title = update.content.title.clone();
                row.description = update.content.description();
                row.bytes = update.content.bytes.clone();
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn insert_files(&mut self, files: &[NewFile]) -> Result<Vec<FileId>> {
        let mut ids = Vec::with_capacity(files.len());
        for file in files {
            let file_id = self.staged.next_file_id;
            self.staged.next_file_id += 1;
            self.staged.files.insert(
                file_id,
                FileRow {
                    file_id,
                    title: file.content.title.clone(),
                    description: file.content.description(),
                    bytes: file.content.bytes.clone(),
                },
            );
            ids.push(file_id);
        }
        if self.drop_returned_id {
            ids.pop();
        }
        Ok(ids)
    }

    async fn insert_links(&mut self, links: &[LinkRecord]) -> Result<u64> {
        if self.fail {
            bail!("foreign key violation on docass");
        }
        self.staged.links.extend_from_slice(links);
        Ok(links.len() as u64)
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let this = *self;
        let mut shared = this.shared.lock().map_err(|_| anyhow!("poisoned"))?;
        *shared = this.staged;
        Ok(())
    }
}

// ============================================================================
// Transcoder
// ============================================================================

/// Writes a fake PDF when `produces_output`, otherwise leaves nothing behind
pub struct FakeTranscoder {
    produces_output: bool,
    calls: AtomicUsize,
    sources: Mutex<Vec<PathBuf>>,
}

impl FakeTranscoder {
    pub fn working() -> Self {
        Self {
            produces_output: true,
            calls: AtomicUsize::new(0),
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn broken() -> Self {
        Self {
            produces_output: false,
            ..Self::working()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn sources(&self) -> Vec<PathBuf> {
        self.sources.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, source: &Path, out_dir: &Path) -> PathBuf {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sources) = self.sources.lock() {
            sources.push(source.to_path_buf());
        }

        let output = out_dir.join(docsync::transcode::COMPRESSED_OUTPUT);
        if self.produces_output {
            if let Ok(input) = tokio::fs::read(source).await {
                let mut pdf = b"%PDF-".to_vec();
                pdf.extend_from_slice(&input);
                let _ = tokio::fs::write(&output, pdf).await;
            }
        }
        output
    }
}
