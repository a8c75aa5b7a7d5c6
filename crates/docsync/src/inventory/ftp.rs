//! FTP inventory source
//!
//! Each operation opens its own session, so listing and fetches can run from
//! parallel tasks. Sessions use Extended Passive Mode (EPSV), which survives
//! NAT and container networking, and every call is retried with a linear
//! backoff before the error is surfaced.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::io::Read;
use std::time::Duration;
use suppaftp::FtpStream;
use tracing::{debug, info, warn};

use super::InventorySource;
use crate::config::FtpConfig;

/// Maximum number of attempts for one FTP operation
pub const MAX_RETRIES: u32 = 3;

/// Base delay between attempts; multiplied by the attempt number
pub const RETRY_DELAY_SECS: u64 = 5;

/// [`InventorySource`] over a directory of an FTP server
pub struct FtpInventory {
    config: FtpConfig,
    retry_delay: Duration,
}

impl FtpInventory {
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            retry_delay: Duration::from_secs(RETRY_DELAY_SECS),
        }
    }

    /// Run a blocking FTP operation with retries
    async fn with_retries<T, F>(&self, what: &str, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&FtpConfig) -> Result<T> + Clone + Send + 'static,
    {
        for attempt in 1..=MAX_RETRIES {
            debug!(attempt, max = MAX_RETRIES, what, "FTP attempt");

            let config = self.config.clone();
            let op = op.clone();
            match tokio::task::spawn_blocking(move || op(&config)).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) if attempt < MAX_RETRIES => {
                    let delay = self.retry_delay * attempt;
                    warn!(
                        attempt,
                        max = MAX_RETRIES,
                        what,
                        error = %format!("{e:#}"),
                        "FTP attempt failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                },
                Ok(Err(e)) => {
                    return Err(e)
                        .with_context(|| format!("{} failed after {} attempts", what, MAX_RETRIES));
                },
                Err(e) => return Err(anyhow::anyhow!("FTP task for {} panicked: {}", what, e)),
            }
        }

        Err(anyhow::anyhow!("{} was never attempted", what))
    }

    fn connect(config: &FtpConfig) -> Result<FtpStream> {
        debug!("Connecting to FTP server: {}:{}", config.host, config.port);

        let mut ftp_stream = FtpStream::connect(format!("{}:{}", config.host, config.port))
            .context("Failed to connect to FTP server")?;
        ftp_stream.set_mode(suppaftp::Mode::ExtendedPassive);

        ftp_stream
            .login(&config.username, &config.password)
            .context("FTP login failed")?;

        Ok(ftp_stream)
    }

    fn list_sync(config: &FtpConfig) -> Result<Vec<String>> {
        let mut ftp_stream = Self::connect(config)?;

        let lines = ftp_stream
            .nlst(Some(config.directory.as_str()))
            .with_context(|| format!("Failed to list directory: {}", config.directory))?;

        if let Err(e) = ftp_stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }

        Ok(normalize_listing(lines))
    }

    fn fetch_sync(config: &FtpConfig, name: &str) -> Result<Vec<u8>> {
        let mut ftp_stream = Self::connect(config)?;

        ftp_stream
            .transfer_type(suppaftp::types::FileType::Binary)
            .context("Failed to set binary mode")?;

        let path = config.remote_path(name);
        let mut reader = ftp_stream
            .retr_as_buffer(&path)
            .with_context(|| format!("Failed to download file: {}", path))?;

        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .context("Failed to read file data")?;

        if let Err(e) = ftp_stream.quit() {
            warn!("Failed to quit FTP session gracefully: {}", e);
        }

        Ok(data)
    }
}

#[async_trait]
impl InventorySource for FtpInventory {
    async fn list(&self) -> Result<Vec<String>> {
        let names = self
            .with_retries("NLST", |config| Self::list_sync(config))
            .await?;
        info!(directory = %self.config.directory, count = names.len(), "Listed inventory");
        Ok(names)
    }

    async fn fetch(&self, name: &str) -> Result<Vec<u8>> {
        let owned = name.to_string();
        let data = self
            .with_retries("RETR", move |config| Self::fetch_sync(config, &owned))
            .await?;
        debug!(name, bytes = data.len(), "Fetched remote file");
        Ok(data)
    }
}

/// Reduce NLST output to bare file names
///
/// Servers differ on whether NLST of a directory returns `name` or
/// `dir/name`; only the last segment is kept. Blank lines and the `.`/`..`
/// entries are dropped.
pub fn normalize_listing<I, S>(lines: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    lines
        .into_iter()
        .filter_map(|line| {
            let line = line.as_ref().trim_end_matches(['\r', '\n']);
            let name = line.rsplit('/').next().unwrap_or(line);
            match name {
                "" | "." | ".." => None,
                name => Some(name.to_string()),
            }
        })
        .collect()
}
