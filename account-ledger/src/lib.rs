//! Account Ledger
//!
//! Per-counterparty balances and settlement-address bindings for a
//! receive-only payment endpoint.
//!
//! # Architecture
//!
//! - **Write-through store**: every mutation is persisted before it is acknowledged
//! - **Single Writer**: one actor task owns the account map, so credit and reset never race
//! - **Immutable binding**: a settlement address, once bound, can never change
//!
//! # Invariants
//!
//! - Balances are never negative and only grow until reset by settlement
//! - A reset returns the prior balance and is durable before it is returned
//! - Synthetic (address-scoped) accounts are never written to the store

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accounts;
pub mod actor;
pub mod address;
pub mod config;
pub mod error;
pub mod storage;
pub mod types;

// Re-exports
pub use accounts::AccountBook;
pub use actor::{spawn_account_actor, AccountHandle};
pub use config::StorageConfig;
pub use error::{Error, Result};
pub use storage::{CachedStore, KeyValueStore, MemoryStore, RocksStore};
pub use types::{
    Account, AddressExistence, CounterpartyId, Destination, DestinationTag, Drops, LedgerAddress,
};
