//! Property-based tests for account invariants
//!
//! These tests use proptest to verify:
//! - Running sum: balance equals the sum of credits since the last reset
//! - Conservation: reset hands back exactly what was credited
//! - Durability: a reopened book sees the same balances
//! - Binding immutability: only the first address ever sticks

use account_ledger::{
    storage::{KeyValueStore, MemoryStore},
    AccountBook, CachedStore, CounterpartyId, Drops, Error,
};
use proptest::prelude::*;
use std::sync::Arc;

const ADDRESSES: [&str; 3] = [
    "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh",
    "rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY",
    "rHQfnr3rS7EC7P9YdYm7zcMXtk9u48TCyB",
];

/// Strategy for claim amounts in drops
fn amount_strategy() -> impl Strategy<Value = u64> {
    0u64..50_000_000u64
}

/// Operation applied to a single account
#[derive(Debug, Clone)]
enum Op {
    Credit(u64),
    Reset,
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => amount_strategy().prop_map(Op::Credit),
        1 => Just(Op::Reset),
    ]
}

proptest! {
    #[test]
    fn prop_balance_is_running_sum(amounts in prop::collection::vec(amount_strategy(), 1..64)) {
        let mut book = AccountBook::new(CachedStore::in_memory());
        let alice = CounterpartyId::new("alice");

        let mut expected: u128 = 0;
        for amount in &amounts {
            expected += *amount as u128;
            let balance = book.credit(&alice, Drops::from(*amount)).unwrap();
            prop_assert_eq!(balance, Drops::new(expected));
        }

        let prior = book.reset_to_zero(&alice).unwrap();
        prop_assert_eq!(prior, Drops::new(expected));
        prop_assert_eq!(book.account(&alice).unwrap().balance, Drops::ZERO);
    }

    #[test]
    fn prop_resets_conserve_total(ops in prop::collection::vec(op_strategy(), 1..100)) {
        let mut book = AccountBook::new(CachedStore::in_memory());
        let alice = CounterpartyId::new("alice");

        let mut credited: u128 = 0;
        let mut settled: u128 = 0;
        for op in &ops {
            match op {
                Op::Credit(amount) => {
                    credited += *amount as u128;
                    book.credit(&alice, Drops::from(*amount)).unwrap();
                }
                Op::Reset => {
                    settled += book.reset_to_zero(&alice).unwrap().get();
                }
            }
        }

        let retained = book.account(&alice).unwrap().balance.get();
        prop_assert_eq!(settled + retained, credited);
    }

    #[test]
    fn prop_balance_survives_reopen(amounts in prop::collection::vec(amount_strategy(), 1..32)) {
        let backend = Arc::new(MemoryStore::new());
        let alice = CounterpartyId::new("alice");
        let total: u128 = amounts.iter().map(|a| *a as u128).sum();

        {
            let mut book = AccountBook::new(CachedStore::new(backend.clone()));
            for amount in &amounts {
                book.credit(&alice, Drops::from(*amount)).unwrap();
            }
        }

        let stored = backend.get("alice:balance").unwrap();
        prop_assert_eq!(stored, Some(total.to_string()));

        let mut reopened = AccountBook::new(CachedStore::new(backend));
        prop_assert_eq!(reopened.account(&alice).unwrap().balance, Drops::new(total));
    }

    #[test]
    fn prop_first_binding_sticks(attempts in prop::collection::vec((0usize..3, prop::option::of(0u64..5)), 1..16)) {
        let mut book = AccountBook::new(CachedStore::in_memory());
        let alice = CounterpartyId::new("alice");

        let (first_idx, first_tag) = attempts[0];
        let first = book.bind_address(&alice, ADDRESSES[first_idx], first_tag).unwrap();

        for (idx, tag) in attempts.iter().skip(1) {
            let result = book.bind_address(&alice, ADDRESSES[*idx], *tag);
            if *idx == first_idx && *tag == first_tag {
                prop_assert_eq!(result.unwrap(), first.clone());
            } else {
                let is_conflict = matches!(result, Err(Error::AddressConflict { .. }));
                prop_assert!(is_conflict);
            }
            let bound = book.account(&alice).unwrap().destination;
            prop_assert_eq!(bound, Some(first.clone()));
        }
    }
}
