//! Property tests for settlement decisions

use account_ledger::{AddressExistence, Drops};
use proptest::prelude::*;
use settlement::{Decision, SettlementPolicy};
use std::time::Duration;

fn policy(threshold: u64, cutoff: u64) -> SettlementPolicy {
    SettlementPolicy {
        threshold: Drops::from(threshold),
        funding_cutoff: Drops::from(cutoff),
        debounce: Duration::from_secs(60),
    }
}

fn existence() -> impl Strategy<Value = AddressExistence> {
    prop_oneof![
        Just(AddressExistence::Unknown),
        Just(AddressExistence::Used),
        Just(AddressExistence::Unused),
    ]
}

proptest! {
    /// An unconfirmed destination never accumulates beyond min(threshold, cutoff)
    #[test]
    fn unconfirmed_credit_is_bounded(
        threshold in 1u64..1_000_000_000,
        cutoff in 1u64..1_000_000_000,
        balance in 0u64..2_000_000_000,
    ) {
        let p = policy(threshold, cutoff);
        let decision = p.decide(Drops::from(balance), Drops::ZERO, AddressExistence::Unused);
        if decision == Decision::Wait {
            prop_assert!(balance <= threshold.min(cutoff));
        }
    }

    /// A triggered settlement carries exactly the balance plus what was pending
    #[test]
    fn triggered_amount_is_merged_total(
        threshold in 1u64..100_000_000,
        cutoff in 1u64..100_000_000,
        balance in 0u64..200_000_000,
        pending in 0u64..200_000_000,
        existence in existence(),
    ) {
        let p = policy(threshold, cutoff);
        let merged = Drops::new(u128::from(balance) + u128::from(pending));
        match p.decide(Drops::from(balance), Drops::from(pending), existence) {
            Decision::Wait => prop_assert!(Drops::from(balance) <= p.effective_threshold(existence)),
            Decision::SettleNow(amount) => {
                prop_assert_eq!(amount, merged);
                prop_assert!(amount > p.funding_cutoff);
            }
            Decision::Defer(amount) => {
                prop_assert_eq!(amount, merged);
                prop_assert!(amount <= p.funding_cutoff);
            }
        }
    }

    /// Confirming the address never makes the policy settle sooner
    #[test]
    fn confirmed_threshold_never_lower(
        threshold in 1u64..1_000_000_000,
        cutoff in 1u64..1_000_000_000,
    ) {
        let p = policy(threshold, cutoff);
        prop_assert!(p.effective_threshold(AddressExistence::Used) >= p.effective_threshold(AddressExistence::Unknown));
        prop_assert_eq!(p.effective_threshold(AddressExistence::Used), Drops::from(threshold));
    }
}
