//! Remote file inventory
//!
//! - **ftp**: [`FtpInventory`], the FTP-backed [`InventorySource`]
//! - **index**: [`WorkingSet`], the per-run set of candidate remote files

pub mod ftp;
pub mod index;

use anyhow::Result;
use async_trait::async_trait;

pub use ftp::FtpInventory;
pub use index::{InventoryEntry, WorkingSet};

/// Anything that can list a flat set of remote file names and fetch them
///
/// The listed location is fixed when the source is constructed.
#[async_trait]
pub trait InventorySource: Send + Sync {
    /// Names of the files currently available
    async fn list(&self) -> Result<Vec<String>>;

    /// Raw bytes of the file called `name`
    async fn fetch(&self, name: &str) -> Result<Vec<u8>>;
}
