//! Postgres catalog store
//!
//! Tables touched:
//!
//! - `item (item_id, item_number)`: read only
//! - `file (file_id, file_title, file_stream, file_descrip)`
//! - `docass (docass_source_id, docass_source_type, docass_target_id,
//!   docass_target_type, docass_purpose, docass_created)`
//!
//! Batch statements are built with [`QueryBuilder`] so one batch is one
//! statement per table, whatever its size.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder, Row, Transaction};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    CatalogItem, CatalogReader, CatalogStore, CatalogTransaction, FileId, FileUpdate, LinkRecord,
    NewFile, StoredFile, TitlePattern,
};
use crate::config::DatabaseConfig;

/// [`CatalogStore`] over a Postgres connection pool
#[derive(Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool sized for a sync run
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .context("Failed to connect to catalog database")?;

        info!("Catalog database connection pool established");
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CatalogReader for PgCatalog {
    async fn select_items(&self) -> Result<Vec<CatalogItem>> {
        let rows = sqlx::query("SELECT item_id, item_number FROM item")
            .fetch_all(&self.pool)
            .await
            .context("Failed to query catalog items")?;

        rows.iter()
            .map(|row| {
                Ok(CatalogItem {
                    item_id: row.try_get("item_id")?,
                    item_number: row.try_get("item_number")?,
                })
            })
            .collect()
    }

    async fn select_file_titles(&self, pattern: &TitlePattern) -> Result<Vec<String>> {
        if pattern.is_empty() {
            return Ok(Vec::new());
        }

        let titles: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT file_title FROM file
            WHERE file_title LIKE ANY($1)
            ORDER BY file_id
            "#,
        )
        .bind(pattern.like_patterns())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query stored file titles")?;

        debug!(prefixes = pattern.prefixes().len(), matched = titles.len(), "Matched stored titles");
        Ok(titles)
    }

    async fn select_files(&self, pattern: &TitlePattern) -> Result<Vec<StoredFile>> {
        if pattern.is_empty() {
            return Ok(Vec::new());
        }

        let rows = sqlx::query(
            r#"
            SELECT file_id, file_title FROM file
            WHERE file_title LIKE ANY($1)
            ORDER BY file_id
            "#,
        )
        .bind(pattern.like_patterns())
        .fetch_all(&self.pool)
        .await
        .context("Failed to query stored files")?;

        rows.iter()
            .map(|row| {
                Ok(StoredFile {
                    file_id: row.try_get("file_id")?,
                    title: row.try_get("file_title")?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CatalogStore for PgCatalog {
    async fn begin(&self) -> Result<Box<dyn CatalogTransaction>> {
        let tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin transaction")?;
        Ok(Box::new(PgCatalogTransaction { tx }))
    }
}

/// One write batch; rolled back by sqlx when dropped uncommitted
struct PgCatalogTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl CatalogTransaction for PgCatalogTransaction {
    async fn update_files(&mut self, files: &[FileUpdate]) -> Result<u64> {
        if files.is_empty() {
            return Ok(0);
        }

        let mut query_builder = QueryBuilder::<Postgres>::new(
            r#"
            UPDATE file
            SET file_title = data.title, file_descrip = data.descr, file_stream = data.stream
            FROM (
            "#,
        );
        query_builder.push_values(files, |mut b, file| {
            b.push_bind(file.file_id)
                .push_bind(file.content.title.as_str())
                .push_bind(file.content.description())
                .push_bind(file.content.bytes.as_slice());
        });
        query_builder.push(") AS data(id, title, descr, stream) WHERE file.file_id = data.id");

        let result = query_builder
            .build()
            .execute(&mut *self.tx)
            .await
            .context("Failed to update files")?;

        Ok(result.rows_affected())
    }

    async fn insert_files(&mut self, files: &[NewFile]) -> Result<Vec<FileId>> {
        if files.is_empty() {
            return Ok(Vec::new());
        }

        let mut query_builder =
            QueryBuilder::<Postgres>::new("INSERT INTO file (file_title, file_stream, file_descrip) ");
        query_builder.push_values(files, |mut b, file| {
            b.push_bind(file.content.title.as_str())
                .push_bind(file.content.bytes.as_slice())
                .push_bind(file.content.description());
        });
        query_builder.push(" RETURNING file_id");

        let ids: Vec<FileId> = query_builder
            .build_query_scalar()
            .fetch_all(&mut *self.tx)
            .await
            .context("Failed to insert files")?;

        Ok(ids)
    }

    async fn insert_links(&mut self, links: &[LinkRecord]) -> Result<u64> {
        if links.is_empty() {
            return Ok(0);
        }

        let mut query_builder = QueryBuilder::<Postgres>::new(
            r#"
            INSERT INTO docass (
                docass_source_id, docass_source_type, docass_target_id,
                docass_target_type, docass_purpose, docass_created
            )
            "#,
        );
        query_builder.push_values(links, |mut b, link| {
            b.push_bind(link.source_id)
                .push_bind(link.source_type)
                .push_bind(link.target_id)
                .push_bind(link.target_type)
                .push_bind(link.purpose)
                .push_bind(link.created_at);
        });

        let result = query_builder
            .build()
            .execute(&mut *self.tx)
            .await
            .context("Failed to insert file links")?;

        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await.context("Failed to commit transaction")
    }
}
