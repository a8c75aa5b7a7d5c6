//! Environment lookups for configuration loaders

use crate::error::{ConfigError, ConfigResult};
use std::collections::HashMap;
use std::str::FromStr;

/// Source of configuration values keyed by variable name
pub trait EnvLookup {
    fn get(&self, key: &str) -> Option<String>;

    /// Parse `key` if set, falling back to `default` when absent
    fn parse_or<T>(&self, key: &str, default: T) -> ConfigResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid_value(key, raw.clone(), e)),
            None => Ok(default),
        }
    }

    /// String value of `key` or `default`
    fn string_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }
}

/// Reads from the process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvLookup for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl EnvLookup for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

impl EnvLookup for HashMap<&str, &str> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).map(|v| v.to_string())
    }
}
