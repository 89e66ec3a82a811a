//! Key-value storage for account state
//!
//! # Contract
//!
//! - `load(key)` must precede the first `get`/`set` of that key
//! - `get` serves from the loaded cache
//! - `set` writes through to the backend before updating the cache
//!
//! # Backends
//!
//! - [`MemoryStore`] - process memory, for tests and dry runs
//! - [`RocksStore`] - RocksDB, one `kv` column family, optionally fsync'd writes

use crate::{
    config::{StorageBackend, StorageConfig},
    error::{Error, Result},
};
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteOptions, DB};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Column family holding every account key
const CF_KV: &str = "kv";

/// Raw persistence backend
pub trait KeyValueStore: Send + Sync {
    /// Read a value
    fn get(&self, key: &str) -> Result<Option<String>>;

    /// Write a value durably
    fn put(&self, key: &str, value: &str) -> Result<()>;
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        self.entries.write().insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// RocksDB backend
pub struct RocksStore {
    db: Arc<DB>,
    sync_writes: bool,
}

impl fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .field("sync_writes", &self.sync_writes)
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &StorageConfig) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        let mut cf_opts = Options::default();
        // Small, hot values: favour read latency
        cf_opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open_cf_descriptors(
            &db_opts,
            path,
            vec![ColumnFamilyDescriptor::new(CF_KV, cf_opts)],
        )?;

        tracing::info!(path = ?path, "Opened RocksDB account store");

        Ok(Self {
            db: Arc::new(db),
            sync_writes: config.rocksdb.sync_writes,
        })
    }

    fn cf_handle(&self) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(CF_KV)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", CF_KV)))
    }
}

impl KeyValueStore for RocksStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let cf = self.cf_handle()?;
        match self.db.get_cf(cf, key.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|e| Error::CorruptValue {
                key: key.to_string(),
                value: format!("non-utf8 value: {}", e),
            }),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<()> {
        let cf = self.cf_handle()?;
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.sync_writes);
        self.db
            .put_cf_opt(cf, key.as_bytes(), value.as_bytes(), &write_opts)?;

        tracing::trace!(key, "Key written");
        Ok(())
    }
}

/// Open the backend named by the configuration
pub fn open_backend(config: &StorageConfig) -> Result<Arc<dyn KeyValueStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StorageBackend::Rocksdb => Ok(Arc::new(RocksStore::open(config)?)),
    }
}

/// Load-then-get/set wrapper with write-through semantics
#[derive(Clone)]
pub struct CachedStore {
    backend: Arc<dyn KeyValueStore>,
    cache: Arc<RwLock<HashMap<String, Option<String>>>>,
}

impl fmt::Debug for CachedStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedStore")
            .field("loaded_keys", &self.cache.read().len())
            .finish()
    }
}

impl CachedStore {
    /// Wrap a backend
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// In-memory store (tests)
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Pull a key from the backend into the cache; no-op if already loaded
    pub fn load(&self, key: &str) -> Result<()> {
        if self.cache.read().contains_key(key) {
            return Ok(());
        }
        let value = self.backend.get(key)?;
        self.cache.write().entry(key.to_string()).or_insert(value);
        Ok(())
    }

    /// Read a loaded key
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        self.cache
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| Error::KeyNotLoaded(key.to_string()))
    }

    /// Write a loaded key through to the backend
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        if !self.cache.read().contains_key(key) {
            return Err(Error::KeyNotLoaded(key.to_string()));
        }
        self.backend.put(key, value)?;
        self.cache
            .write()
            .insert(key.to_string(), Some(value.to_string()));
        Ok(())
    }

    /// Load then get
    pub fn fetch(&self, key: &str) -> Result<Option<String>> {
        self.load(key)?;
        self.get(key)
    }
}

/// Persisted keys
pub mod keys {
    use crate::types::{CounterpartyId, Destination, LedgerAddress};

    /// Retained balance, decimal drops
    pub fn balance(id: &CounterpartyId) -> String {
        format!("{}:balance", id)
    }

    /// Bound destination, `address` or `address~tag`
    pub fn address(id: &CounterpartyId) -> String {
        format!("{}:address", id)
    }

    /// Cached ledger existence, `true` / `false`
    pub fn address_exists(address: &LedgerAddress) -> String {
        format!("{}:address_exists", address)
    }

    /// Deferred settlement record for a destination
    pub fn pending(destination: &Destination) -> String {
        format!("{}:pending", destination)
    }

    /// Index of destinations with a deferred settlement record
    pub const PENDING_INDEX: &str = "pending_destinations";
}
