use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::metrics::StorageMetrics;
use crate::types::{NdError, Result};

/// Default number of image bytes reserved up front.
pub const DEFAULT_INITIAL_CAPACITY: usize = 64 * 1024;

/// Configuration options supplied when creating or opening a
/// [`super::Database`].
#[derive(Clone, Default)]
pub struct DatabaseOptions {
    /// Backing file used by `flush`; `None` keeps the image in memory only.
    pub path: Option<PathBuf>,
    /// Image bytes reserved up front to avoid early reallocation.
    pub initial_capacity: usize,
    /// Whether freed blocks are overwritten with zeroes.
    pub scrub_freed: bool,
    /// Optional metrics collection implementation.
    pub metrics: Option<Arc<dyn StorageMetrics>>,
}

impl DatabaseOptions {
    /// Creates in-memory options with default settings.
    pub fn new() -> Self {
        Self {
            path: None,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            scrub_freed: false,
            metrics: None,
        }
    }

    /// Sets the backing file.
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Sets the number of image bytes reserved up front.
    pub fn initial_capacity(mut self, bytes: usize) -> Self {
        self.initial_capacity = bytes;
        self
    }

    /// Enables or disables zeroing of freed blocks.
    pub fn scrub_freed(mut self, enabled: bool) -> Self {
        self.scrub_freed = enabled;
        self
    }

    /// Sets the metrics collection implementation.
    pub fn metrics(mut self, metrics: Arc<dyn StorageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl fmt::Debug for DatabaseOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("path", &self.path)
            .field("initial_capacity", &self.initial_capacity)
            .field("scrub_freed", &self.scrub_freed)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// File-level configuration, read from TOML.
///
/// ```toml
/// [storage]
/// path = "index.nd"
/// initial_capacity = 1048576
/// scrub_freed = false
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct NdConfig {
    /// Storage medium settings.
    pub storage: StorageSection,
}

/// The `[storage]` table.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    /// Backing file.
    pub path: Option<PathBuf>,
    /// Image bytes reserved up front.
    pub initial_capacity: usize,
    /// Whether freed blocks are overwritten with zeroes.
    pub scrub_freed: bool,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            path: None,
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            scrub_freed: false,
        }
    }
}

impl NdConfig {
    /// Parses a configuration document.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| NdError::Config(err.to_string()))
    }

    /// Reads and parses a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Renders the configuration back to TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|err| NdError::Config(err.to_string()))
    }

    /// Converts the file-level settings into database options.
    pub fn into_options(self) -> DatabaseOptions {
        let mut opts = DatabaseOptions::new()
            .initial_capacity(self.storage.initial_capacity)
            .scrub_freed(self.storage.scrub_freed);
        opts.path = self.storage.path;
        opts
    }
}
