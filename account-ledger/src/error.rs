//! Error types for the account ledger

use thiserror::Error;

/// Result type for account ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Account ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Rebind to a different address, or an address that is not a valid ledger address
    #[error("Address conflict for {account}: {reason}")]
    AddressConflict {
        /// Account the binding was requested for
        account: String,
        /// What made the binding unacceptable
        reason: String,
    },

    /// Destination tag outside [0, 2^32 - 1] or not a number
    #[error("Invalid destination tag: {0}")]
    InvalidDestinationTag(String),

    /// Balance would exceed the representable range
    #[error("Balance overflow: {0}")]
    BalanceOverflow(String),

    /// Key read or written before `load`
    #[error("Key not loaded: {0}")]
    KeyNotLoaded(String),

    /// Persisted value could not be parsed
    #[error("Corrupt value for {key}: {value}")]
    CorruptValue {
        /// Store key
        key: String,
        /// Raw value found
        value: String,
    },

    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Build an [`Error::AddressConflict`]
    pub fn address_conflict(account: impl ToString, reason: impl Into<String>) -> Self {
        Error::AddressConflict {
            account: account.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Self {
        Error::Other(msg)
    }
}

impl From<&str> for Error {
    fn from(msg: &str) -> Self {
        Error::Other(msg.to_string())
    }
}
