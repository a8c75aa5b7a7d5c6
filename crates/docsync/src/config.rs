//! Configuration management
//!
//! All settings come from the environment (a `.env` file is honoured) and are
//! handed to each component at construction time. Nothing reads the
//! environment after [`SyncConfig::load`] returns.

use docsync_common::env::{EnvLookup, ProcessEnv};
use docsync_common::{ConfigError, ConfigResult};
use serde::{Deserialize, Serialize};
use std::path::{Component, PathBuf};
use std::time::Duration;

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_FTP_HOST: &str = "localhost";
pub const DEFAULT_FTP_PORT: u16 = 21;
pub const DEFAULT_FTP_USER: &str = "anonymous";
pub const DEFAULT_FTP_PASSWORD: &str = "docsync@localhost";
pub const DEFAULT_FTP_DIR: &str = "FTP";

pub const DEFAULT_DATABASE_URL: &str = "postgresql://localhost/postbooks";
pub const DEFAULT_DATABASE_MAX_CONNECTIONS: u32 = 4;
pub const DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_CONVERT_PROGRAM: &str = "lowriter";
pub const DEFAULT_CONVERT_ARGS: &[&str] = &["--convert-to", "pdf:writer_pdf_Export"];
pub const DEFAULT_COMPRESS_PROGRAM: &str = "ps2pdf";
pub const DEFAULT_COMPRESS_ARGS: &[&str] = &["-dPDFSETTINGS=/ebook"];
pub const DEFAULT_TRANSCODE_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_TRANSCODE_CONCURRENCY: usize = 1;

pub const DEFAULT_WORK_DIR: &str = "temp_files";

/// Files per write transaction
pub const DEFAULT_BATCH_SIZE: usize = 5;

pub const DEFAULT_FETCH_CONCURRENCY: usize = 4;

/// Full run configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub ftp: FtpConfig,
    pub database: DatabaseConfig,
    pub transcoder: TranscoderConfig,
    pub run: RunConfig,
}

/// Inventory server connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    /// Remote directory holding the documents
    pub directory: String,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_FTP_HOST.to_string(),
            port: DEFAULT_FTP_PORT,
            username: DEFAULT_FTP_USER.to_string(),
            password: DEFAULT_FTP_PASSWORD.to_string(),
            directory: DEFAULT_FTP_DIR.to_string(),
        }
    }
}

impl FtpConfig {
    /// Remote path of a file inside the configured directory
    pub fn remote_path(&self, name: &str) -> String {
        let dir = self.directory.trim_end_matches('/');
        if dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", dir, name)
        }
    }
}

/// Catalog database connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(skip_serializing)]
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: DEFAULT_DATABASE_MAX_CONNECTIONS,
            connect_timeout_secs: DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS,
        }
    }
}

/// External document conversion commands
///
/// The converter is called as `<convert_program> <convert_args..>
/// [<profile arg>] <source> --outdir <dir>` and the compressor as
/// `<compress_program> <compress_args..> <intermediate> <output>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscoderConfig {
    pub convert_program: String,
    pub convert_args: Vec<String>,
    pub compress_program: String,
    pub compress_args: Vec<String>,
    /// Wall-clock limit for each conversion stage
    pub stage_timeout_secs: u64,
    /// Give every conversion its own office profile inside its output
    /// directory (`-env:UserInstallation`)
    pub isolate_profile: bool,
    /// Conversions allowed to run at the same time
    pub max_concurrent: usize,
}

impl Default for TranscoderConfig {
    fn default() -> Self {
        Self {
            convert_program: DEFAULT_CONVERT_PROGRAM.to_string(),
            convert_args: DEFAULT_CONVERT_ARGS.iter().map(|s| s.to_string()).collect(),
            compress_program: DEFAULT_COMPRESS_PROGRAM.to_string(),
            compress_args: DEFAULT_COMPRESS_ARGS.iter().map(|s| s.to_string()).collect(),
            stage_timeout_secs: DEFAULT_TRANSCODE_TIMEOUT_SECS,
            isolate_profile: true,
            max_concurrent: DEFAULT_TRANSCODE_CONCURRENCY,
        }
    }
}

impl TranscoderConfig {
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }
}

/// What happens to the remaining batches once one fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BatchFailurePolicy {
    /// Abort the run; batches committed so far stay committed
    #[default]
    Stop,
    /// Log the failed batch and carry on with the next one
    Continue,
}

impl std::str::FromStr for BatchFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "stop" | "strict" => Ok(BatchFailurePolicy::Stop),
            "continue" | "best-effort" => Ok(BatchFailurePolicy::Continue),
            _ => Err(format!("expected 'stop' or 'continue', got '{s}'")),
        }
    }
}

/// Run behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Scratch area, wiped at the start and end of every run
    pub work_dir: PathBuf,
    pub batch_size: usize,
    /// Candidates fetched and converted in parallel
    pub fetch_concurrency: usize,
    pub on_batch_failure: BatchFailurePolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from(DEFAULT_WORK_DIR),
            batch_size: DEFAULT_BATCH_SIZE,
            fetch_concurrency: DEFAULT_FETCH_CONCURRENCY,
            on_batch_failure: BatchFailurePolicy::default(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            ftp: FtpConfig::default(),
            database: DatabaseConfig::default(),
            transcoder: TranscoderConfig::default(),
            run: RunConfig::default(),
        }
    }
}

fn split_args(raw: Option<String>, default: Vec<String>) -> Vec<String> {
    match raw {
        Some(raw) => raw.split_whitespace().map(str::to_string).collect(),
        None => default,
    }
}

impl SyncConfig {
    /// Load configuration from `.env` and the process environment
    pub fn load() -> ConfigResult<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(&ProcessEnv)
    }

    /// Build configuration from any key lookup
    ///
    /// Environment variables:
    /// - `DOCSYNC_FTP_HOST`, `DOCSYNC_FTP_PORT`, `DOCSYNC_FTP_USER`,
    ///   `DOCSYNC_FTP_PASSWORD`, `DOCSYNC_FTP_DIR`
    /// - `DATABASE_URL`, `DATABASE_MAX_CONNECTIONS`, `DATABASE_CONNECT_TIMEOUT`
    /// - `DOCSYNC_CONVERT_PROGRAM`, `DOCSYNC_CONVERT_ARGS`,
    ///   `DOCSYNC_COMPRESS_PROGRAM`, `DOCSYNC_COMPRESS_ARGS`,
    ///   `DOCSYNC_TRANSCODE_TIMEOUT`, `DOCSYNC_CONVERT_ISOLATE_PROFILE`,
    ///   `DOCSYNC_TRANSCODE_CONCURRENCY`
    /// - `DOCSYNC_WORK_DIR`, `DOCSYNC_BATCH_SIZE`, `DOCSYNC_FETCH_CONCURRENCY`,
    ///   `DOCSYNC_ON_BATCH_FAILURE` (stop | continue)
    pub fn from_lookup(env: &impl EnvLookup) -> ConfigResult<Self> {
        let defaults = Self::default();

        let config = SyncConfig {
            ftp: FtpConfig {
                host: env.string_or("DOCSYNC_FTP_HOST", DEFAULT_FTP_HOST),
                port: env.parse_or("DOCSYNC_FTP_PORT", DEFAULT_FTP_PORT)?,
                username: env.string_or("DOCSYNC_FTP_USER", DEFAULT_FTP_USER),
                password: env.string_or("DOCSYNC_FTP_PASSWORD", DEFAULT_FTP_PASSWORD),
                directory: env.string_or("DOCSYNC_FTP_DIR", DEFAULT_FTP_DIR),
            },
            database: DatabaseConfig {
                url: env.string_or("DATABASE_URL", DEFAULT_DATABASE_URL),
                max_connections: env
                    .parse_or("DATABASE_MAX_CONNECTIONS", DEFAULT_DATABASE_MAX_CONNECTIONS)?,
                connect_timeout_secs: env
                    .parse_or("DATABASE_CONNECT_TIMEOUT", DEFAULT_DATABASE_CONNECT_TIMEOUT_SECS)?,
            },
            transcoder: TranscoderConfig {
                convert_program: env.string_or("DOCSYNC_CONVERT_PROGRAM", DEFAULT_CONVERT_PROGRAM),
                convert_args: split_args(
                    env.get("DOCSYNC_CONVERT_ARGS"),
                    defaults.transcoder.convert_args,
                ),
                compress_program: env
                    .string_or("DOCSYNC_COMPRESS_PROGRAM", DEFAULT_COMPRESS_PROGRAM),
                compress_args: split_args(
                    env.get("DOCSYNC_COMPRESS_ARGS"),
                    defaults.transcoder.compress_args,
                ),
                stage_timeout_secs: env
                    .parse_or("DOCSYNC_TRANSCODE_TIMEOUT", DEFAULT_TRANSCODE_TIMEOUT_SECS)?,
                isolate_profile: env.parse_or("DOCSYNC_CONVERT_ISOLATE_PROFILE", true)?,
                max_concurrent: env
                    .parse_or("DOCSYNC_TRANSCODE_CONCURRENCY", DEFAULT_TRANSCODE_CONCURRENCY)?,
            },
            run: RunConfig {
                work_dir: env
                    .get("DOCSYNC_WORK_DIR")
                    .map(PathBuf::from)
                    .unwrap_or(defaults.run.work_dir),
                batch_size: env.parse_or("DOCSYNC_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
                fetch_concurrency: env
                    .parse_or("DOCSYNC_FETCH_CONCURRENCY", DEFAULT_FETCH_CONCURRENCY)?,
                on_batch_failure: env
                    .parse_or("DOCSYNC_ON_BATCH_FAILURE", BatchFailurePolicy::default())?,
            },
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.ftp.host.trim().is_empty() {
            return Err(ConfigError::Missing("DOCSYNC_FTP_HOST".to_string()));
        }

        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Missing("DATABASE_URL".to_string()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "DATABASE_MAX_CONNECTIONS must be greater than 0".to_string(),
            ));
        }

        if self.run.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "DOCSYNC_BATCH_SIZE must be greater than 0".to_string(),
            ));
        }

        if self.run.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "DOCSYNC_FETCH_CONCURRENCY must be greater than 0".to_string(),
            ));
        }

        if self.transcoder.stage_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "DOCSYNC_TRANSCODE_TIMEOUT must be greater than 0".to_string(),
            ));
        }

        if self.transcoder.max_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "DOCSYNC_TRANSCODE_CONCURRENCY must be greater than 0".to_string(),
            ));
        }

        // A run directory below the work dir is wiped on every run.
        let work_dir = &self.run.work_dir;
        if work_dir.as_os_str().is_empty() || work_dir.parent().is_none() {
            return Err(ConfigError::Invalid(format!(
                "DOCSYNC_WORK_DIR must not be empty or a filesystem root: {}",
                work_dir.display()
            )));
        }
        if work_dir
            .components()
            .any(|c| matches!(c, Component::CurDir | Component::ParentDir))
        {
            return Err(ConfigError::Invalid(format!(
                "DOCSYNC_WORK_DIR must not contain '.' or '..' components: {}",
                work_dir.display()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_from_empty_environment() {
        let env: HashMap<&str, &str> = HashMap::new();
        let config = SyncConfig::from_lookup(&env).unwrap();

        assert_eq!(config.ftp.port, 21);
        assert_eq!(config.ftp.directory, "FTP");
        assert_eq!(config.run.batch_size, 5);
        assert_eq!(config.run.on_batch_failure, BatchFailurePolicy::Stop);
        assert_eq!(config.transcoder.convert_program, "lowriter");
        assert_eq!(
            config.transcoder.compress_args,
            vec!["-dPDFSETTINGS=/ebook".to_string()]
        );
        assert!(config.transcoder.isolate_profile);
        assert_eq!(config.transcoder.max_concurrent, 1);
    }

    #[test]
    fn test_transcoder_isolation_settings() {
        let env = HashMap::from([
            ("DOCSYNC_CONVERT_ISOLATE_PROFILE", "false"),
            ("DOCSYNC_TRANSCODE_CONCURRENCY", "2"),
        ]);
        let config = SyncConfig::from_lookup(&env).unwrap();
        assert!(!config.transcoder.isolate_profile);
        assert_eq!(config.transcoder.max_concurrent, 2);

        let env = HashMap::from([("DOCSYNC_TRANSCODE_CONCURRENCY", "0")]);
        assert!(matches!(
            SyncConfig::from_lookup(&env),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_overrides() {
        let env = HashMap::from([
            ("DOCSYNC_FTP_HOST", "192.168.0.15"),
            ("DOCSYNC_FTP_DIR", "incoming/"),
            ("DOCSYNC_BATCH_SIZE", "10"),
            ("DOCSYNC_ON_BATCH_FAILURE", "continue"),
            ("DOCSYNC_CONVERT_ARGS", "--headless --convert-to pdf"),
        ]);
        let config = SyncConfig::from_lookup(&env).unwrap();

        assert_eq!(config.ftp.host, "192.168.0.15");
        assert_eq!(config.ftp.remote_path("item1_1.txt"), "incoming/item1_1.txt");
        assert_eq!(config.run.batch_size, 10);
        assert_eq!(config.run.on_batch_failure, BatchFailurePolicy::Continue);
        assert_eq!(
            config.transcoder.convert_args,
            vec!["--headless", "--convert-to", "pdf"]
        );
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let env = HashMap::from([("DOCSYNC_BATCH_SIZE", "0")]);
        assert!(matches!(
            SyncConfig::from_lookup(&env),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_root_work_dir_is_rejected() {
        let env = HashMap::from([("DOCSYNC_WORK_DIR", "/")]);
        assert!(SyncConfig::from_lookup(&env).is_err());
    }

    #[test]
    fn test_relative_parent_work_dirs_are_rejected() {
        for dir in [".", "..", "./", "../temp_files", "temp_files/..", "a/../b", "./temp_files"] {
            let env = HashMap::from([("DOCSYNC_WORK_DIR", dir)]);
            assert!(
                matches!(SyncConfig::from_lookup(&env), Err(ConfigError::Invalid(_))),
                "work dir {dir:?} was accepted"
            );
        }
    }

    #[test]
    fn test_nested_work_dir_is_accepted() {
        let env = HashMap::from([("DOCSYNC_WORK_DIR", "var/docsync/temp_files")]);
        let config = SyncConfig::from_lookup(&env).unwrap();
        assert_eq!(config.run.work_dir, PathBuf::from("var/docsync/temp_files"));
    }

    #[test]
    fn test_bad_port_names_the_variable() {
        let env = HashMap::from([("DOCSYNC_FTP_PORT", "ftp")]);
        match SyncConfig::from_lookup(&env) {
            Err(ConfigError::InvalidValue { key, .. }) => assert_eq!(key, "DOCSYNC_FTP_PORT"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_remote_path_without_directory() {
        let ftp = FtpConfig {
            directory: String::new(),
            ..FtpConfig::default()
        };
        assert_eq!(ftp.remote_path("a_1.pdf"), "a_1.pdf");
    }
}
