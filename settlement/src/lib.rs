//! Settlement Engine
//!
//! Accumulates verified off-ledger claims per counterparty and pays the
//! retained credit out as on-ledger settlement transactions.
//!
//! # Architecture
//!
//! ```text
//! transport ──ClaimHandler──▶ gate ──▶ account ledger ──▶ scheduler ──▶ tracker ──▶ LedgerClient
//!                                                              ▲                        │
//!                                                              └──── notifications ─────┘
//! ```
//!
//! 1. **Gate**: a claim is credited only if its fulfillment hashes to its condition
//! 2. **Credit**: the account ledger actor applies the credit durably
//! 3. **Decide**: the scheduler settles now, defers behind a debounce timer, or waits
//! 4. **Settle**: the tracker signs, submits and awaits the validated-transaction notification
//!
//! Settlement never delays a claim's acknowledgement; its outcome is logged,
//! counted and relayed to connected counterparties.
//!
//! # Example
//!
//! ```no_run
//! use settlement::{ClaimHandler, Config, SettlementEngine, SimulatedLedger};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> settlement::Result<()> {
//!     let config = Config::from_env()?;
//!     let engine = SettlementEngine::new(&config, Arc::new(SimulatedLedger::new()))?;
//!     engine.start().await?;
//!
//!     let alice = account_ledger::CounterpartyId::new("alice");
//!     engine
//!         .on_connection_handshake(&alice, "rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY", None)
//!         .await?;
//!
//!     engine.shutdown().await
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod config;
pub mod discovery;
pub mod engine;
pub mod error;
pub mod gate;
pub mod ledger_client;
pub mod metrics;
pub mod scheduler;
pub mod tracker;
pub mod transport;

// Re-exports
pub use config::Config;
pub use discovery::DiscoveryResolver;
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use ledger_client::{LedgerClient, SimulatedLedger};
pub use metrics::Metrics;
pub use scheduler::{Decision, SettlementPolicy, SettlementScheduler};
pub use tracker::{SettlementReceipt, TransactionTracker};
pub use transport::{ClaimAck, ClaimHandler, ConnectionRegistry, InboundClaim, SettlementNotice};
