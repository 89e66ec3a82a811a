//! Discovery identifiers
//!
//! A discovery identifier names a raw settlement destination without any
//! connection: lowercase RFC 4648 base32 (no padding) of the 20-byte account
//! id, optionally followed by the 4-byte big-endian destination tag.
//!
//! Claims addressed to `<prefix>.<identifier>[.<anything>]` are credited to
//! the synthetic account of the decoded destination.

use account_ledger::{Destination, DestinationTag, LedgerAddress};
use data_encoding::BASE32_NOPAD;

/// Encoded length of an untagged identifier
const UNTAGGED_LEN: usize = 32;
/// Encoded length of a tagged identifier
const TAGGED_LEN: usize = 39;

fn base32_encode(bytes: &[u8]) -> String {
    BASE32_NOPAD.encode(bytes).to_ascii_lowercase()
}

/// Rejects non-zero trailing bits, so every identifier has one decoding
fn base32_decode(input: &str) -> Option<Vec<u8>> {
    BASE32_NOPAD
        .decode(input.to_ascii_uppercase().as_bytes())
        .ok()
}

/// Identifier for a destination
pub fn encode(destination: &Destination) -> String {
    let mut bytes = destination.address.account_id().to_vec();
    if let Some(tag) = destination.tag {
        bytes.extend_from_slice(&tag.get().to_be_bytes());
    }
    base32_encode(&bytes)
}

/// Destination named by an identifier, `None` if it is not one
pub fn decode(identifier: &str) -> Option<Destination> {
    if identifier.len() != UNTAGGED_LEN && identifier.len() != TAGGED_LEN {
        return None;
    }
    let bytes = base32_decode(identifier)?;

    let account_id: [u8; 20] = bytes.get(..20)?.try_into().ok()?;
    let tag = match bytes.get(20..) {
        Some([]) | None => None,
        Some(rest) => {
            let raw: [u8; 4] = rest.try_into().ok()?;
            Some(DestinationTag::new(u32::from_be_bytes(raw)))
        }
    };

    Some(Destination::new(LedgerAddress::from_account_id(&account_id), tag))
}

/// Resolves claim destinations under the discovery prefix
#[derive(Debug, Clone)]
pub struct DiscoveryResolver {
    prefix: String,
}

impl DiscoveryResolver {
    /// Resolver for identifiers directly under `prefix`
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('.').to_string(),
        }
    }

    /// Address a payer uses to reach `destination`
    pub fn address_for(&self, destination: &Destination) -> String {
        format!("{}.{}", self.prefix, encode(destination))
    }

    /// Raw destination addressed by `ilp_destination`, if it is a discovery address
    pub fn resolve(&self, ilp_destination: &str) -> Option<Destination> {
        let rest = ilp_destination
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('.')?;
        let identifier = rest.split('.').next()?;
        decode(identifier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn destination(s: &str) -> Destination {
        Destination::parse(s).unwrap()
    }

    #[test]
    fn test_base32_known_vectors() {
        assert_eq!(base32_encode(b"f"), "my");
        assert_eq!(base32_encode(b"foobar"), "mzxw6ytboi");
        assert_eq!(base32_decode("mzxw6ytboi").unwrap(), b"foobar");
        assert_eq!(base32_decode("MZXW6YTBOI").unwrap(), b"foobar");
    }

    #[test]
    fn test_non_canonical_rejected() {
        // "mz" carries a stray low bit beyond the single encoded byte
        assert!(base32_decode("mz").is_none());
        assert!(base32_decode("m1").is_none());
    }

    #[test]
    fn test_identifier_inverse() {
        let plain = destination("rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY");
        let id = encode(&plain);
        assert_eq!(id.len(), UNTAGGED_LEN);
        assert_eq!(decode(&id), Some(plain));

        let tagged = destination("rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY~4294967295");
        let id = encode(&tagged);
        assert_eq!(id.len(), TAGGED_LEN);
        assert_eq!(decode(&id), Some(tagged));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode("").is_none());
        assert!(decode("not-an-identifier").is_none());
        assert!(decode(&"a".repeat(33)).is_none());
        assert!(decode(&"!".repeat(32)).is_none());
    }

    #[test]
    fn test_resolver() {
        let resolver = DiscoveryResolver::new("g.settle.spsp.");
        let dest = destination("rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh~7");
        let address = resolver.address_for(&dest);
        assert!(address.starts_with("g.settle.spsp."));

        assert_eq!(resolver.resolve(&address), Some(dest.clone()));
        assert_eq!(resolver.resolve(&format!("{}.conn.42", address)), Some(dest));
        assert_eq!(resolver.resolve("g.settle.alice"), None);
        assert_eq!(resolver.resolve("g.settle.spspx.abc"), None);
        assert_eq!(resolver.resolve("g.settle.spsp"), None);
    }
}
