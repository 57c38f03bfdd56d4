//! Per-session sync configuration.

use crate::hasher::{ContentHasher, DigestAlgorithm};
use crate::storage::MetadataTable;
use crate::strategy::TableSyncStrategies;
use std::env;

/// Default suffix appended to a table name to name its metadata table.
pub const DEFAULT_METADATA_SUFFIX: &str = "_md";

/// Configuration shared by the enumerator, resolver and orchestrator of one
/// sync context. Built once and passed in explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Synchronized tables and their strategies
    pub strategies: TableSyncStrategies,
    /// Metadata table suffix
    pub metadata_suffix: String,
    /// Digest used for `mdv`
    pub digest: DigestAlgorithm,
    /// Retries of a whole `applyChanges` call after a transient failure
    pub apply_retries: u32,
    /// Retries of a whole `getChanges` call after a transient failure
    pub get_changes_retries: u32,
    /// Retries of metadata table creation
    pub bootstrap_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            strategies: TableSyncStrategies::default(),
            metadata_suffix: DEFAULT_METADATA_SUFFIX.to_string(),
            digest: DigestAlgorithm::default(),
            apply_retries: 3,
            get_changes_retries: 3,
            bootstrap_retries: 5,
        }
    }
}

impl SyncConfig {
    pub fn new(strategies: TableSyncStrategies) -> Self {
        Self {
            strategies,
            ..Self::default()
        }
    }

    /// Load tunables from environment variables on top of `strategies`.
    ///
    /// Reads `REVSYNC_METADATA_SUFFIX`, `REVSYNC_DIGEST`,
    /// `REVSYNC_APPLY_RETRIES`, `REVSYNC_GET_CHANGES_RETRIES` and
    /// `REVSYNC_BOOTSTRAP_RETRIES`; unset variables keep their defaults.
    pub fn from_env(strategies: TableSyncStrategies) -> Result<Self, ConfigError> {
        let mut config = Self::new(strategies);

        if let Ok(suffix) = env::var("REVSYNC_METADATA_SUFFIX") {
            if suffix.is_empty() {
                return Err(ConfigError::EmptySuffix);
            }
            config.metadata_suffix = suffix;
        }

        if let Ok(name) = env::var("REVSYNC_DIGEST") {
            config.digest =
                DigestAlgorithm::from_name(&name).map_err(|_| ConfigError::InvalidDigest(name))?;
        }

        config.apply_retries = retries_from_env("REVSYNC_APPLY_RETRIES", config.apply_retries)?;
        config.get_changes_retries =
            retries_from_env("REVSYNC_GET_CHANGES_RETRIES", config.get_changes_retries)?;
        config.bootstrap_retries =
            retries_from_env("REVSYNC_BOOTSTRAP_RETRIES", config.bootstrap_retries)?;

        Ok(config)
    }

    pub fn with_metadata_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.metadata_suffix = suffix.into();
        self
    }

    pub fn with_digest(mut self, digest: DigestAlgorithm) -> Self {
        self.digest = digest;
        self
    }

    pub fn with_apply_retries(mut self, retries: u32) -> Self {
        self.apply_retries = retries;
        self
    }

    pub fn with_get_changes_retries(mut self, retries: u32) -> Self {
        self.get_changes_retries = retries;
        self
    }

    pub fn with_bootstrap_retries(mut self, retries: u32) -> Self {
        self.bootstrap_retries = retries;
        self
    }

    /// Metadata table shadowing `table`.
    pub fn metadata_table(&self, table: &str) -> MetadataTable {
        MetadataTable::new(table, &self.metadata_suffix)
    }

    pub fn hasher(&self) -> ContentHasher {
        ContentHasher::new(self.digest)
    }
}

fn retries_from_env(var: &'static str, default: u32) -> Result<u32, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidRetries { var, value }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("REVSYNC_METADATA_SUFFIX must not be empty")]
    EmptySuffix,

    #[error("Invalid REVSYNC_DIGEST value: {0}")]
    InvalidDigest(String),

    #[error("Invalid {var} value: {value}")]
    InvalidRetries { var: &'static str, value: String },
}

impl From<ConfigError> for crate::Error {
    fn from(err: ConfigError) -> Self {
        crate::Error::Config(err.to_string())
    }
}
