/*!
 * Configuration types for Depot
 */

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checksum::HashAlgorithm;
use crate::error::{DepotError, Result};

/// Top-level configuration, usually read from `depot.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct DepotConfig {
    /// Log level for diagnostic output
    #[serde(default)]
    pub log_level: LogLevel,

    /// Log file path (None = stdout)
    #[serde(default)]
    pub log_file: Option<PathBuf>,

    /// Enable verbose logging (shorthand for log_level = debug)
    #[serde(default)]
    pub verbose: bool,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub sync: SyncConfig,
}

/// Resource/container cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Read-only content shipped with the application
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    /// Downloaded content; a file here wins over the same name in `base_dir`
    #[serde(default = "default_update_dir")]
    pub update_dir: PathBuf,

    /// File name of the packed store inside either directory
    #[serde(default = "default_store_name")]
    pub store_name: String,

    /// Active variants, highest priority first
    #[serde(default)]
    pub active_variants: Vec<String>,

    /// How containers are opened
    #[serde(default)]
    pub open_mode: OpenMode,

    /// Containers allowed to be opening at once (0 = unlimited).
    /// Further opens wait in `Init` and start from `tick` in request order.
    #[serde(default)]
    pub max_opening_containers: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            update_dir: default_update_dir(),
            store_name: default_store_name(),
            active_variants: Vec::new(),
            open_mode: OpenMode::default(),
            max_opening_containers: 0,
        }
    }
}

/// Container open strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// Open during the tick that requests it
    #[default]
    Sync,

    /// Open on a worker thread, polled on later ticks
    Background,
}

/// Content synchronisation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Remote root; item URLs are `<source_url>/<name>`
    #[serde(default)]
    pub source_url: String,

    /// Local directory receiving downloads, `ver` and the packed store
    #[serde(default = "default_update_dir")]
    pub save_dir: PathBuf,

    /// Concurrent downloads
    #[serde(default = "default_max_downloads")]
    pub max_downloads: usize,

    #[serde(default)]
    pub verify: VerifyMode,

    #[serde(default)]
    pub hash_algorithm: HashAlgorithm,

    /// Progress/speed sampling interval in milliseconds
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,

    /// Fold downloaded files into the packed store
    #[serde(default = "default_true")]
    pub use_packed_store: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            source_url: String::new(),
            save_dir: default_update_dir(),
            max_downloads: default_max_downloads(),
            verify: VerifyMode::default(),
            hash_algorithm: HashAlgorithm::default(),
            sample_interval_ms: default_sample_interval_ms(),
            use_packed_store: true,
        }
    }
}

impl SyncConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

/// Post-transfer verification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerifyMode {
    /// Length only
    Length,

    /// Length, then content hash
    #[default]
    Hash,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn to_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_base_dir() -> PathBuf {
    PathBuf::from("content")
}

fn default_update_dir() -> PathBuf {
    PathBuf::from("downloads")
}

fn default_store_name() -> String {
    depot_core_manifest::STORE_FILE_NAME.to_string()
}

fn default_max_downloads() -> usize {
    3
}

fn default_sample_interval_ms() -> u64 {
    500
}

impl DepotConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: DepotConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file(&self, path: &Path) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| DepotError::Config(format!("TOML encode error: {}", e)))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject settings the engines cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.sync.max_downloads == 0 {
            return Err(DepotError::Config(
                "sync.max_downloads must be at least 1".to_string(),
            ));
        }
        if self.sync.sample_interval_ms == 0 {
            return Err(DepotError::Config(
                "sync.sample_interval_ms must be positive".to_string(),
            ));
        }
        if self.cache.store_name.is_empty() {
            return Err(DepotError::Config(
                "cache.store_name cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}
