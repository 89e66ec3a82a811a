//! Actor-based concurrency for the account book
//!
//! This module implements the single-writer pattern using Tokio actors:
//! - One task owns the [`AccountBook`], so no two mutations ever interleave
//! - Each reply is sent only after the write-through completed
//! - Async message passing with backpressure
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │        Claim handlers / handshakes / scheduler        │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │              AccountHandle (Clone)                    │
//! │         Sends messages to actor mailbox              │
//! └─────────────────────┬────────────────────────────────┘
//!                       │
//!                       │ mpsc::channel (bounded)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │             AccountActor (Single Task)                │
//! │     AccountBook → CachedStore → KeyValueStore         │
//! └───────────────────────────────────────────────────────┘
//! ```

use crate::{
    accounts::AccountBook,
    types::{Account, AddressExistence, CounterpartyId, Destination, Drops, LedgerAddress},
    Error, Result,
};
use tokio::sync::{mpsc, oneshot};

/// Message sent to the account actor
#[derive(Debug)]
pub enum AccountMessage {
    /// Add to a balance
    Credit {
        id: CounterpartyId,
        amount: Drops,
        response: oneshot::Sender<Result<Drops>>,
    },

    /// Zero a balance, returning the prior value
    ResetToZero {
        id: CounterpartyId,
        response: oneshot::Sender<Result<Drops>>,
    },

    /// Bind a settlement destination
    BindAddress {
        id: CounterpartyId,
        address: String,
        tag: Option<u64>,
        response: oneshot::Sender<Result<Destination>>,
    },

    /// Get account snapshot
    GetAccount {
        id: CounterpartyId,
        response: oneshot::Sender<Result<Account>>,
    },

    /// Record a ledger existence answer
    RecordAddressExistence {
        address: LedgerAddress,
        exists: bool,
        response: oneshot::Sender<Result<AddressExistence>>,
    },

    /// Resolve a synthetic account for a raw destination
    ResolveByAddress {
        destination: Destination,
        response: oneshot::Sender<Result<CounterpartyId>>,
    },

    /// Shutdown actor
    Shutdown,
}

/// Actor that owns the account book
#[derive(Debug)]
pub struct AccountActor {
    book: AccountBook,
    mailbox: mpsc::Receiver<AccountMessage>,
}

impl AccountActor {
    /// Create new actor
    pub fn new(book: AccountBook, mailbox: mpsc::Receiver<AccountMessage>) -> Self {
        Self { book, mailbox }
    }

    /// Run the actor event loop
    pub async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            if let AccountMessage::Shutdown = msg {
                tracing::debug!("Account actor shutting down");
                break;
            }
            self.handle_message(msg);
        }
    }

    fn handle_message(&mut self, msg: AccountMessage) {
        match msg {
            AccountMessage::Credit { id, amount, response } => {
                let _ = response.send(self.book.credit(&id, amount));
            }

            AccountMessage::ResetToZero { id, response } => {
                let _ = response.send(self.book.reset_to_zero(&id));
            }

            AccountMessage::BindAddress {
                id,
                address,
                tag,
                response,
            } => {
                let _ = response.send(self.book.bind_address(&id, &address, tag));
            }

            AccountMessage::GetAccount { id, response } => {
                let _ = response.send(self.book.account(&id));
            }

            AccountMessage::RecordAddressExistence {
                address,
                exists,
                response,
            } => {
                let _ = response.send(self.book.record_address_existence(&address, exists));
            }

            AccountMessage::ResolveByAddress {
                destination,
                response,
            } => {
                let _ = response.send(self.book.resolve_or_create_by_address(&destination));
            }

            AccountMessage::Shutdown => {
                // Handled in run loop
            }
        }
    }
}

/// Handle for sending messages to the actor
#[derive(Debug, Clone)]
pub struct AccountHandle {
    sender: mpsc::Sender<AccountMessage>,
}

impl AccountHandle {
    /// Create new handle
    pub fn new(sender: mpsc::Sender<AccountMessage>) -> Self {
        Self { sender }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T>>) -> AccountMessage,
    ) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(build(tx))
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;

        rx.await
            .map_err(|_| Error::Concurrency("Response channel closed".to_string()))?
    }

    /// Add `amount` to the balance, returning the new balance
    pub async fn credit(&self, id: &CounterpartyId, amount: Drops) -> Result<Drops> {
        let id = id.clone();
        self.request(|response| AccountMessage::Credit {
            id,
            amount,
            response,
        })
        .await
    }

    /// Zero the balance, returning the prior balance
    pub async fn reset_to_zero(&self, id: &CounterpartyId) -> Result<Drops> {
        let id = id.clone();
        self.request(|response| AccountMessage::ResetToZero { id, response })
            .await
    }

    /// Bind a settlement address and optional tag
    pub async fn bind_address(
        &self,
        id: &CounterpartyId,
        address: &str,
        tag: Option<u64>,
    ) -> Result<Destination> {
        let id = id.clone();
        let address = address.to_string();
        self.request(|response| AccountMessage::BindAddress {
            id,
            address,
            tag,
            response,
        })
        .await
    }

    /// Get account snapshot
    pub async fn account(&self, id: &CounterpartyId) -> Result<Account> {
        let id = id.clone();
        self.request(|response| AccountMessage::GetAccount { id, response })
            .await
    }

    /// Whether the account's bound address has ever transacted
    pub async fn address_ever_used(&self, id: &CounterpartyId) -> Result<AddressExistence> {
        Ok(self.account(id).await?.address_ever_used)
    }

    /// Cache a ledger existence answer
    pub async fn record_address_existence(
        &self,
        address: &LedgerAddress,
        exists: bool,
    ) -> Result<AddressExistence> {
        let address = address.clone();
        self.request(|response| AccountMessage::RecordAddressExistence {
            address,
            exists,
            response,
        })
        .await
    }

    /// Synthetic account for a raw destination
    pub async fn resolve_or_create_by_address(
        &self,
        destination: &Destination,
    ) -> Result<CounterpartyId> {
        let destination = destination.clone();
        self.request(|response| AccountMessage::ResolveByAddress {
            destination,
            response,
        })
        .await
    }

    /// Shutdown actor
    pub async fn shutdown(&self) -> Result<()> {
        self.sender
            .send(AccountMessage::Shutdown)
            .await
            .map_err(|_| Error::Concurrency("Actor mailbox closed".to_string()))?;
        Ok(())
    }
}

/// Spawn the account actor
pub fn spawn_account_actor(book: AccountBook) -> AccountHandle {
    let (tx, rx) = mpsc::channel(1000); // Bounded channel for backpressure
    let actor = AccountActor::new(book, rx);

    tokio::spawn(async move {
        actor.run().await;
    });

    AccountHandle::new(tx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::CachedStore;

    #[tokio::test]
    async fn test_actor_spawn_and_shutdown() {
        let handle = spawn_account_actor(AccountBook::new(CachedStore::in_memory()));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_actor_credit_and_reset() {
        let handle = spawn_account_actor(AccountBook::new(CachedStore::in_memory()));
        let alice = CounterpartyId::new("alice");

        assert_eq!(handle.credit(&alice, Drops::new(5)).await.unwrap(), Drops::new(5));
        assert_eq!(handle.credit(&alice, Drops::new(6)).await.unwrap(), Drops::new(11));
        assert_eq!(handle.reset_to_zero(&alice).await.unwrap(), Drops::new(11));
        assert_eq!(handle.account(&alice).await.unwrap().balance, Drops::ZERO);

        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_credits_serialize() {
        let handle = spawn_account_actor(AccountBook::new(CachedStore::in_memory()));
        let alice = CounterpartyId::new("alice");

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let handle = handle.clone();
                let alice = alice.clone();
                tokio::spawn(async move { handle.credit(&alice, Drops::new(3)).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(handle.account(&alice).await.unwrap().balance, Drops::new(150));
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_mailbox_reports_concurrency_error() {
        let handle = spawn_account_actor(AccountBook::new(CachedStore::in_memory()));
        handle.shutdown().await.unwrap();
        tokio::task::yield_now().await;

        let err = handle
            .credit(&CounterpartyId::new("alice"), Drops::new(1))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Concurrency(_)));
    }
}
