//! Configuration for account storage

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which key-value backend persists account state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// Process memory only (tests, dry runs)
    Memory,
    /// RocksDB on local disk
    Rocksdb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Backend selection
    pub backend: StorageBackend,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/accounts"),
            backend: StorageBackend::Rocksdb,
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Fsync every write (account state is small and must survive a crash)
    pub sync_writes: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 16,
            max_write_buffer_number: 2,
            max_background_jobs: 2,
            sync_writes: true,
        }
    }
}

impl StorageConfig {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: StorageConfig = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// In-memory configuration (tests)
    pub fn in_memory() -> Self {
        Self {
            backend: StorageBackend::Memory,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = StorageConfig::default();
        assert_eq!(config.backend, StorageBackend::Rocksdb);
        assert!(config.rocksdb.sync_writes);
    }

    #[test]
    fn test_parse_partial_toml() {
        let config: StorageConfig = toml::from_str(
            r#"
            backend = "memory"
            data_dir = "/tmp/accounts"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, StorageBackend::Memory);
        assert_eq!(config.data_dir, PathBuf::from("/tmp/accounts"));
        assert_eq!(config.rocksdb.max_background_jobs, 2);
    }
}
