//! Account book: balances, bindings and existence flags
//!
//! Accounts are created lazily on first touch, loaded from the store, and
//! never deleted. Every mutation is written through before the in-memory
//! record changes, so a failed write leaves the account exactly as it was.
//!
//! Synthetic accounts (see [`AccountBook::resolve_or_create_by_address`])
//! live in memory only.

use crate::{
    storage::{keys, CachedStore},
    types::{Account, AddressExistence, CounterpartyId, Destination, DestinationTag, Drops, LedgerAddress},
    Error, Result,
};
use std::collections::HashMap;

/// Per-counterparty account records over a write-through store
#[derive(Debug)]
pub struct AccountBook {
    store: CachedStore,
    accounts: HashMap<CounterpartyId, Account>,
}

impl AccountBook {
    /// Create book over a store
    pub fn new(store: CachedStore) -> Self {
        Self {
            store,
            accounts: HashMap::new(),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &CachedStore {
        &self.store
    }

    /// Load (or create) an account record
    fn open(&mut self, id: &CounterpartyId) -> Result<&mut Account> {
        if !self.accounts.contains_key(id) {
            let account = self.load_account(id)?;
            self.accounts.insert(id.clone(), account);
        }
        self.accounts
            .get_mut(id)
            .ok_or_else(|| Error::Other(format!("account {} vanished", id)))
    }

    fn load_account(&self, id: &CounterpartyId) -> Result<Account> {
        let mut account = Account::new(id.clone());
        if id.is_synthetic() {
            return Ok(account);
        }

        let balance_key = keys::balance(id);
        if let Some(raw) = self.store.fetch(&balance_key)? {
            account.balance = raw.parse().map_err(|_| Error::CorruptValue {
                key: balance_key.clone(),
                value: raw.clone(),
            })?;
        }

        let address_key = keys::address(id);
        if let Some(raw) = self.store.fetch(&address_key)? {
            let destination = Destination::parse(&raw).map_err(|_| Error::CorruptValue {
                key: address_key.clone(),
                value: raw.clone(),
            })?;
            account.address_ever_used = self.load_existence(&destination.address)?;
            account.destination = Some(destination);
        }

        tracing::debug!(
            counterparty = %id,
            balance = %account.balance,
            "Account loaded"
        );

        Ok(account)
    }

    fn load_existence(&self, address: &LedgerAddress) -> Result<AddressExistence> {
        let raw = self.store.fetch(&keys::address_exists(address))?;
        Ok(AddressExistence::from_stored(raw.as_deref()))
    }

    /// Snapshot of an account
    pub fn account(&mut self, id: &CounterpartyId) -> Result<Account> {
        Ok(self.open(id)?.clone())
    }

    /// Add `amount` to the retained balance, returning the new balance
    pub fn credit(&mut self, id: &CounterpartyId, amount: Drops) -> Result<Drops> {
        let store = self.store.clone();
        let account = self.open(id)?;
        let balance = account.balance.checked_add(amount)?;

        if !id.is_synthetic() {
            store.set(&keys::balance(id), &balance.to_string())?;
        }
        account.balance = balance;

        tracing::debug!(counterparty = %id, amount = %amount, balance = %balance, "Credited");
        Ok(balance)
    }

    /// Zero the retained balance, returning what it held
    ///
    /// The zero is durable before this returns.
    pub fn reset_to_zero(&mut self, id: &CounterpartyId) -> Result<Drops> {
        let store = self.store.clone();
        let account = self.open(id)?;
        let prior = account.balance;

        if !id.is_synthetic() {
            store.set(&keys::balance(id), &Drops::ZERO.to_string())?;
        }
        account.balance = Drops::ZERO;

        tracing::debug!(counterparty = %id, prior = %prior, "Balance reset for settlement");
        Ok(prior)
    }

    /// Bind a settlement destination
    ///
    /// Identical rebinding is a no-op; anything else on a bound account is an
    /// [`Error::AddressConflict`]. Validation happens before any state change.
    pub fn bind_address(
        &mut self,
        id: &CounterpartyId,
        address: &str,
        tag: Option<u64>,
    ) -> Result<Destination> {
        let tag = tag.map(DestinationTag::try_from_u64).transpose()?;
        let address = LedgerAddress::parse(address).ok_or_else(|| {
            Error::address_conflict(id, format!("'{}' is not a valid ledger address", address))
        })?;
        let requested = Destination::new(address, tag);

        let store = self.store.clone();
        let account = self.open(id)?;

        match &account.destination {
            Some(bound) if *bound == requested => Ok(requested),
            Some(bound) => Err(Error::address_conflict(
                id,
                format!("bound to {}, refused {}", bound, requested),
            )),
            None => {
                let existence_key = keys::address_exists(&requested.address);
                store.load(&existence_key)?;
                if !id.is_synthetic() {
                    store.set(&keys::address(id), &requested.to_string())?;
                }
                account.address_ever_used = AddressExistence::from_stored(store.get(&existence_key)?.as_deref());
                account.destination = Some(requested.clone());

                tracing::info!(counterparty = %id, destination = %requested, "Settlement address bound");
                Ok(requested)
            }
        }
    }

    /// Whether the account's bound address has ever transacted
    pub fn address_ever_used(&mut self, id: &CounterpartyId) -> Result<AddressExistence> {
        Ok(self.open(id)?.address_ever_used)
    }

    /// Cache a ledger existence answer for an address and every account bound to it
    ///
    /// `Used` is final: a later `Unused` answer never downgrades it.
    pub fn record_address_existence(
        &mut self,
        address: &LedgerAddress,
        exists: bool,
    ) -> Result<AddressExistence> {
        let key = keys::address_exists(address);
        let current = AddressExistence::from_stored(self.store.fetch(&key)?.as_deref());
        let next = if current == AddressExistence::Used {
            AddressExistence::Used
        } else {
            AddressExistence::from_exists(exists)
        };

        if next != current {
            if let Some(stored) = next.to_stored() {
                self.store.set(&key, stored)?;
            }
        }

        for account in self.accounts.values_mut() {
            if account.destination.as_ref().map(|d| &d.address) == Some(address) {
                account.address_ever_used = next;
            }
        }

        Ok(next)
    }

    /// Address-scoped account for payments that arrive through discovery
    ///
    /// Not tied to a connection and never persisted.
    pub fn resolve_or_create_by_address(
        &mut self,
        destination: &Destination,
    ) -> Result<CounterpartyId> {
        let id = CounterpartyId::synthetic(destination);
        if !self.accounts.contains_key(&id) {
            let mut account = Account::new(id.clone());
            account.address_ever_used = self.load_existence(&destination.address)?;
            account.destination = Some(destination.clone());
            self.accounts.insert(id.clone(), account);
            tracing::debug!(counterparty = %id, "Synthetic account created");
        }
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KeyValueStore, MemoryStore};
    use std::sync::Arc;

    const ADDR_A: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";
    const ADDR_B: &str = "rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY";

    fn book() -> (AccountBook, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        (AccountBook::new(CachedStore::new(backend.clone())), backend)
    }

    #[test]
    fn test_credit_accumulates_and_persists() {
        let (mut book, backend) = book();
        let alice = CounterpartyId::new("alice");

        assert_eq!(book.credit(&alice, Drops::new(10)).unwrap(), Drops::new(10));
        assert_eq!(book.credit(&alice, Drops::new(15)).unwrap(), Drops::new(25));
        assert_eq!(backend.get("alice:balance").unwrap().as_deref(), Some("25"));
    }

    #[test]
    fn test_reset_returns_prior() {
        let (mut book, backend) = book();
        let alice = CounterpartyId::new("alice");

        book.credit(&alice, Drops::new(700)).unwrap();
        assert_eq!(book.reset_to_zero(&alice).unwrap(), Drops::new(700));
        assert_eq!(book.account(&alice).unwrap().balance, Drops::ZERO);
        assert_eq!(backend.get("alice:balance").unwrap().as_deref(), Some("0"));
        assert_eq!(book.reset_to_zero(&alice).unwrap(), Drops::ZERO);
    }

    #[test]
    fn test_balance_survives_restart() {
        let backend = Arc::new(MemoryStore::new());
        let alice = CounterpartyId::new("alice");
        {
            let mut book = AccountBook::new(CachedStore::new(backend.clone()));
            book.credit(&alice, Drops::new(42)).unwrap();
            book.bind_address(&alice, ADDR_A, Some(7)).unwrap();
        }

        let mut book = AccountBook::new(CachedStore::new(backend));
        let account = book.account(&alice).unwrap();
        assert_eq!(account.balance, Drops::new(42));
        assert_eq!(account.destination.unwrap().to_string(), format!("{}~7", ADDR_A));
    }

    #[test]
    fn test_bind_same_address_is_noop() {
        let (mut book, _) = book();
        let alice = CounterpartyId::new("alice");

        let first = book.bind_address(&alice, ADDR_A, None).unwrap();
        let second = book.bind_address(&alice, ADDR_A, None).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_bind_conflict_keeps_original() {
        let (mut book, backend) = book();
        let alice = CounterpartyId::new("alice");

        book.bind_address(&alice, ADDR_A, None).unwrap();
        let err = book.bind_address(&alice, ADDR_B, None).unwrap_err();
        assert!(matches!(err, Error::AddressConflict { .. }));

        // Same address, different tag, is also a conflict
        let err = book.bind_address(&alice, ADDR_A, Some(1)).unwrap_err();
        assert!(matches!(err, Error::AddressConflict { .. }));

        let bound = book.account(&alice).unwrap().destination.unwrap();
        assert_eq!(bound.address.as_str(), ADDR_A);
        assert_eq!(backend.get("alice:address").unwrap().as_deref(), Some(ADDR_A));
    }

    #[test]
    fn test_bind_rejects_malformed_address_and_tag() {
        let (mut book, backend) = book();
        let alice = CounterpartyId::new("alice");

        let err = book.bind_address(&alice, "not-an-address", None).unwrap_err();
        assert!(matches!(err, Error::AddressConflict { .. }));

        let err = book
            .bind_address(&alice, ADDR_A, Some(u32::MAX as u64 + 1))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidDestinationTag(_)));

        assert!(book.account(&alice).unwrap().destination.is_none());
        assert_eq!(backend.get("alice:address").unwrap(), None);
    }

    #[test]
    fn test_existence_cached_and_final() {
        let (mut book, backend) = book();
        let alice = CounterpartyId::new("alice");
        let dest = book.bind_address(&alice, ADDR_A, None).unwrap();
        assert_eq!(book.address_ever_used(&alice).unwrap(), AddressExistence::Unknown);

        book.record_address_existence(&dest.address, false).unwrap();
        assert_eq!(book.address_ever_used(&alice).unwrap(), AddressExistence::Unused);

        book.record_address_existence(&dest.address, true).unwrap();
        assert_eq!(book.address_ever_used(&alice).unwrap(), AddressExistence::Used);
        assert_eq!(
            backend.get(&format!("{}:address_exists", ADDR_A)).unwrap().as_deref(),
            Some("true")
        );

        // Never downgraded
        book.record_address_existence(&dest.address, false).unwrap();
        assert_eq!(book.address_ever_used(&alice).unwrap(), AddressExistence::Used);
    }

    #[test]
    fn test_synthetic_account_not_persisted() {
        let (mut book, backend) = book();
        let dest = Destination::parse(ADDR_B).unwrap();

        let id = book.resolve_or_create_by_address(&dest).unwrap();
        assert_eq!(book.resolve_or_create_by_address(&dest).unwrap(), id);
        book.credit(&id, Drops::new(99)).unwrap();

        let account = book.account(&id).unwrap();
        assert_eq!(account.balance, Drops::new(99));
        assert_eq!(account.destination, Some(dest));
        assert!(backend.get(&format!("{}:balance", id)).unwrap().is_none());
    }
}
