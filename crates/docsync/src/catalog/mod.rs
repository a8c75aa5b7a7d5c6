//! Catalog store access
//!
//! The catalog is the business database: items keyed by item number and file
//! attachments linked to them. This module defines the records the sync reads
//! and writes, and the two seams every store implements:
//!
//! - [`CatalogReader`]: the read queries used during reconciliation
//! - [`CatalogStore`]: opens a [`CatalogTransaction`] for one write batch
//!
//! Submodules:
//!
//! - **postgres**: [`PgCatalog`], the sqlx implementation
//! - **writer**: [`CatalogWriter`], batching and file id propagation

pub mod postgres;
pub mod writer;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

pub use postgres::PgCatalog;
pub use writer::{assign_file_ids, CatalogWriter, InsertedFile};

pub type ItemId = i32;
pub type FileId = i32;

/// Link source type for catalog items
pub const LINK_SOURCE_ITEM: &str = "I";

/// Link target type for file attachments
pub const LINK_TARGET_FILE: &str = "FILE";

/// Link purpose: plain association
pub const LINK_PURPOSE_ASSOCIATION: &str = "S";

/// An existing business entity; never written by the sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CatalogItem {
    pub item_id: ItemId,
    pub item_number: String,
}

/// An attachment already in the catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredFile {
    pub file_id: FileId,
    pub title: String,
}

/// Final payload for one remote file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub title: String,
    pub bytes: Vec<u8>,
}

impl FileContent {
    pub fn description(&self) -> String {
        crate::naming::describe(&self.title)
    }
}

/// Overwrite of an existing attachment with newer remote content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub file_id: FileId,
    pub content: FileContent,
}

/// A new attachment, to be linked to `item_id` once stored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewFile {
    pub item_id: ItemId,
    pub content: FileContent,
}

/// Association between a catalog item and a file attachment
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkRecord {
    pub source_id: ItemId,
    pub source_type: &'static str,
    pub target_id: FileId,
    pub target_type: &'static str,
    pub purpose: &'static str,
    pub created_at: DateTime<Utc>,
}

impl LinkRecord {
    /// Item-to-file association created for a newly inserted attachment
    pub fn item_file(item_id: ItemId, file_id: FileId, created_at: DateTime<Utc>) -> Self {
        Self {
            source_id: item_id,
            source_type: LINK_SOURCE_ITEM,
            target_id: file_id,
            target_type: LINK_TARGET_FILE,
            purpose: LINK_PURPOSE_ASSOCIATION,
            created_at,
        }
    }
}

/// Titles starting with any of a set of literal prefixes
///
/// Stores translate this to their own pattern syntax; prefixes never carry
/// wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TitlePattern {
    prefixes: Vec<String>,
}

impl TitlePattern {
    pub fn any_prefix<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut prefixes: Vec<String> = prefixes.into_iter().map(Into::into).collect();
        prefixes.sort();
        prefixes.dedup();
        Self { prefixes }
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    pub fn is_empty(&self) -> bool {
        self.prefixes.is_empty()
    }

    pub fn matches(&self, title: &str) -> bool {
        self.prefixes.iter().any(|prefix| title.starts_with(prefix.as_str()))
    }

    /// SQL `LIKE` patterns, one per prefix, with `\` as escape character
    pub fn like_patterns(&self) -> Vec<String> {
        self.prefixes
            .iter()
            .map(|prefix| {
                let mut pattern = String::with_capacity(prefix.len() + 1);
                for c in prefix.chars() {
                    if matches!(c, '\\' | '%' | '_') {
                        pattern.push('\\');
                    }
                    pattern.push(c);
                }
                pattern.push('%');
                pattern
            })
            .collect()
    }
}

/// Read side of the catalog
#[async_trait]
pub trait CatalogReader: Send + Sync {
    /// Every catalog item
    async fn select_items(&self) -> Result<Vec<CatalogItem>>;

    /// Titles of stored files matching `pattern`
    async fn select_file_titles(&self, pattern: &TitlePattern) -> Result<Vec<String>>;

    /// Ids and titles of stored files matching `pattern`, ordered by id
    async fn select_files(&self, pattern: &TitlePattern) -> Result<Vec<StoredFile>>;
}

/// Write side of the catalog
#[async_trait]
pub trait CatalogStore: CatalogReader {
    /// Start the transaction that scopes one write batch
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>>;
}

/// One all-or-nothing write batch
///
/// Dropping the transaction without [`commit`](CatalogTransaction::commit)
/// discards every statement issued through it.
#[async_trait]
pub trait CatalogTransaction: Send {
    /// Rewrite title, description and content of existing files
    async fn update_files(&mut self, files: &[FileUpdate]) -> Result<u64>;

    /// Insert files, returning generated ids in submission order
    async fn insert_files(&mut self, files: &[NewFile]) -> Result<Vec<FileId>>;

    async fn insert_links(&mut self, links: &[LinkRecord]) -> Result<u64>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
