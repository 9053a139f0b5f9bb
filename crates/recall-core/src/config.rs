//! Configuration surface for the retrieval engine.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{Result, StoreError};
use crate::ranking::FusionConfig;
use crate::types::OrphanPolicy;

/// Store type selected by [`StoreConfig::store_type`].
pub const STORE_TYPE_SQLITE: &str = "sqlite";
pub const STORE_TYPE_MEMORY: &str = "memory";

/// Top-level store configuration.
///
/// Backend selection is a pure configuration decision made once at startup;
/// an unrecognized `store_type` fails fast with `UnsupportedBackend`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selector: "sqlite" (reference backend) or "memory".
    #[serde(default = "default_store_type")]
    pub store_type: String,

    /// Reference backend parameters.
    #[serde(default)]
    pub sqlite: SqliteConfig,

    /// Hybrid fusion weights.
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Policy applied when deleting a document that has children.
    #[serde(default)]
    pub orphan_policy: OrphanPolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            store_type: default_store_type(),
            sqlite: SqliteConfig::default(),
            fusion: FusionConfig::default(),
            orphan_policy: OrphanPolicy::default(),
        }
    }
}

/// SQLite backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database file path. Empty path means an in-memory database.
    #[serde(default = "default_database_path")]
    pub path: PathBuf,

    /// Page cache size in MB.
    #[serde(default = "default_cache_size_mb")]
    pub cache_size_mb: u32,

    /// Memory-map size in MB.
    #[serde(default = "default_mmap_size_mb")]
    pub mmap_size_mb: u32,

    /// Enable write-ahead logging (recommended).
    #[serde(default = "default_true")]
    pub wal_enabled: bool,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u32,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            cache_size_mb: 128,
            mmap_size_mb: 256,
            wal_enabled: true,
            busy_timeout_ms: 10_000,
        }
    }
}

fn default_store_type() -> String {
    STORE_TYPE_SQLITE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_size_mb() -> u32 {
    128
}

fn default_mmap_size_mb() -> u32 {
    256
}

fn default_busy_timeout_ms() -> u32 {
    10_000
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("recall")
        .join("vectors.db")
}

impl StoreConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| StoreError::config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Load configuration from default paths, falling back to defaults.
    ///
    /// Checks the user config dir (`recall/config.toml`) then a local
    /// `recall.toml`.
    pub fn load_default() -> Result<Self> {
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("recall").join("config.toml");
            if user_config.exists() {
                return Self::load(&user_config);
            }
        }

        let local_config = PathBuf::from("recall.toml");
        if local_config.exists() {
            return Self::load(&local_config);
        }

        Ok(Self::default())
    }
}
