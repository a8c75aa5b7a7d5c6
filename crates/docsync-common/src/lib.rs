//! Docsync Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Pieces shared by every docsync workspace member:
//!
//! - **Logging**: `tracing` subscriber bootstrap driven by [`logging::LogConfig`]
//! - **Errors**: [`ConfigError`], raised while reading configuration values
//! - **Environment**: [`env::EnvLookup`], a key lookup that configuration loaders
//!   read through so they can be exercised without touching the process environment
//!
//! # Example
//!
//! ```no_run
//! use docsync_common::logging::{init_logging, LogConfig};
//!
//! let config = LogConfig::from_env().unwrap_or_default();
//! let _guard = init_logging(&config).expect("logging");
//! tracing::info!("ready");
//! ```

pub mod env;
pub mod error;
pub mod logging;

pub use error::{ConfigError, ConfigResult};
