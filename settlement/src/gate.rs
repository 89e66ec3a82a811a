//! Claim verification gate
//!
//! A claim is accepted only if SHA-256(fulfillment) equals its execution
//! condition byte for byte. This runs before any balance changes.

use crate::{Error, Result};
use sha2::{Digest, Sha256};

/// Hash arbitrary bytes using SHA-256
pub fn hash_bytes(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Execution condition for a fulfillment
pub fn condition_for(fulfillment: &[u8]) -> [u8; 32] {
    hash_bytes(fulfillment)
}

/// Accept iff `fulfillment` hashes to `execution_condition`
///
/// On mismatch the error carries both values, hex encoded, for audit.
pub fn verify_fulfillment(execution_condition: &[u8], fulfillment: &[u8]) -> Result<()> {
    let computed = hash_bytes(fulfillment);
    if computed.as_slice() == execution_condition {
        return Ok(());
    }

    tracing::warn!(
        condition = %hex::encode(execution_condition),
        computed = %hex::encode(computed),
        "Fulfillment does not match condition"
    );

    Err(Error::InvalidFulfillment {
        condition: hex::encode(execution_condition),
        fulfillment: hex::encode(fulfillment),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_fulfillment_accepted() {
        let fulfillment = [7u8; 32];
        let condition = condition_for(&fulfillment);
        assert!(verify_fulfillment(&condition, &fulfillment).is_ok());
    }

    #[test]
    fn test_mismatch_carries_both_values() {
        let fulfillment = [7u8; 32];
        let condition = condition_for(&[8u8; 32]);

        match verify_fulfillment(&condition, &fulfillment) {
            Err(Error::InvalidFulfillment {
                condition: c,
                fulfillment: f,
            }) => {
                assert_eq!(c, hex::encode(condition));
                assert_eq!(f, hex::encode(fulfillment));
            }
            other => panic!("expected InvalidFulfillment, got {:?}", other),
        }
    }

    #[test]
    fn test_truncated_condition_rejected() {
        let fulfillment = b"preimage";
        let condition = condition_for(fulfillment);
        assert!(verify_fulfillment(&condition[..31], fulfillment).is_err());
        assert!(verify_fulfillment(&[], fulfillment).is_err());
    }

    #[test]
    fn test_known_vector() {
        // SHA-256 of the empty string
        assert_eq!(
            hex::encode(condition_for(b"")),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
