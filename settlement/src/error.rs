//! Error types for the settlement engine

use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Fulfillment does not hash to the execution condition
    #[error("Invalid fulfillment: condition={condition} fulfillment={fulfillment}")]
    InvalidFulfillment {
        /// Hex-encoded execution condition
        condition: String,
        /// Hex-encoded fulfillment presented
        fulfillment: String,
    },

    /// Account ledger error (address conflict, bad tag, storage)
    #[error("Account ledger error: {0}")]
    Ledger(#[from] account_ledger::Error),

    /// Claim for a connection account that never bound a settlement address
    #[error("No settlement address bound for {0}")]
    AddressNotBound(String),

    /// Outbound value transfer requested; this endpoint only receives
    #[error("Receive only: outbound sends are not supported")]
    ReceiveOnly,

    /// Ledger rejected or failed to validate the settlement transaction
    #[error("Settlement {transaction_id} failed: {engine_result}")]
    SettlementFailed {
        /// Transaction hash
        transaction_id: String,
        /// Ledger engine result code
        engine_result: String,
    },

    /// No validated-transaction notification arrived in time
    #[error("Settlement {transaction_id} unconfirmed after {waited_ms}ms")]
    SettlementTimeout {
        /// Transaction hash
        transaction_id: String,
        /// How long the tracker waited
        waited_ms: u64,
    },

    /// No active connection for a counterparty
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    /// Ledger client error (connect, prepare, sign, submit, query)
    #[error("Ledger client error: {0}")]
    LedgerClient(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the error is a caller-facing validation failure (no state changed)
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::InvalidFulfillment { .. }
                | Error::AddressNotBound(_)
                | Error::ReceiveOnly
                | Error::Ledger(account_ledger::Error::AddressConflict { .. })
                | Error::Ledger(account_ledger::Error::InvalidDestinationTag(_))
        )
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
