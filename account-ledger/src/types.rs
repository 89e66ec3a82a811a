//! Core types for the account ledger
//!
//! All amounts are integers in the ledger's smallest unit (drops); conversion
//! to display denomination happens only at the ledger-client boundary.

use crate::{address, Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Counterparty identifier (connection account name, or synthetic address account)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CounterpartyId(String);

const SYNTHETIC_PREFIX: &str = "address:";

impl CounterpartyId {
    /// Create new counterparty ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Synthetic account scoped to a raw destination
    pub fn synthetic(destination: &Destination) -> Self {
        Self(format!("{}{}", SYNTHETIC_PREFIX, destination))
    }

    /// Whether this is an address-scoped account rather than a connection
    pub fn is_synthetic(&self) -> bool {
        self.0.starts_with(SYNTHETIC_PREFIX)
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CounterpartyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Amount in the ledger's smallest unit
///
/// Serialized as a decimal string so persisted values never lose precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(into = "String", try_from = "String")]
pub struct Drops(u128);

impl Drops {
    /// Zero drops
    pub const ZERO: Drops = Drops(0);

    /// Wrap a raw amount
    pub const fn new(amount: u128) -> Self {
        Self(amount)
    }

    /// Raw amount
    pub const fn get(self) -> u128 {
        self.0
    }

    /// Whether the amount is zero
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Add, failing instead of wrapping
    pub fn checked_add(self, other: Drops) -> Result<Drops> {
        self.0
            .checked_add(other.0)
            .map(Drops)
            .ok_or_else(|| Error::BalanceOverflow(format!("{} + {}", self, other)))
    }
}

impl From<u64> for Drops {
    fn from(amount: u64) -> Self {
        Self(amount as u128)
    }
}

impl From<Drops> for String {
    fn from(drops: Drops) -> Self {
        drops.0.to_string()
    }
}

impl TryFrom<String> for Drops {
    type Error = std::num::ParseIntError;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl FromStr for Drops {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        s.trim().parse::<u128>().map(Drops)
    }
}

impl fmt::Display for Drops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Validated classic ledger address
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct LedgerAddress(String);

impl LedgerAddress {
    /// Parse and validate (alphabet, length, version byte, checksum)
    pub fn parse(s: &str) -> Option<Self> {
        address::decode_account_id(s).map(|_| Self(s.to_string()))
    }

    /// Encode a 20-byte account id
    pub fn from_account_id(account_id: &[u8; 20]) -> Self {
        Self(address::encode_account_id(account_id))
    }

    /// The 20-byte account id this address encodes
    pub fn account_id(&self) -> [u8; 20] {
        // Only constructed through `parse` or `from_account_id`, so decoding cannot fail
        address::decode_account_id(&self.0).unwrap_or([0u8; 20])
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<LedgerAddress> for String {
    fn from(address: LedgerAddress) -> Self {
        address.0
    }
}

impl TryFrom<String> for LedgerAddress {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        LedgerAddress::parse(&value).ok_or_else(|| format!("malformed ledger address '{}'", value))
    }
}

impl fmt::Display for LedgerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Destination tag (sub-account qualifier), range [0, 2^32 - 1]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationTag(u32);

impl DestinationTag {
    /// Wrap a tag already known to be in range
    pub const fn new(tag: u32) -> Self {
        Self(tag)
    }

    /// Range-checked conversion from a wider integer
    pub fn try_from_u64(tag: u64) -> Result<Self> {
        u32::try_from(tag)
            .map(Self)
            .map_err(|_| Error::InvalidDestinationTag(format!("{} exceeds 4294967295", tag)))
    }

    /// Parse from the decimal form carried in handshakes and persisted bindings
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidDestinationTag(format!("'{}' is not a number", s)));
        }
        let wide: u64 = trimmed
            .parse()
            .map_err(|_| Error::InvalidDestinationTag(format!("{} exceeds 4294967295", s)))?;
        Self::try_from_u64(wide)
    }

    /// Raw value
    pub const fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for DestinationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where settlements are paid: address plus optional tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Destination {
    /// Ledger address
    pub address: LedgerAddress,
    /// Optional destination tag
    pub tag: Option<DestinationTag>,
}

/// Separator between address and tag in the persisted binding
const TAG_SEPARATOR: char = '~';

impl Destination {
    /// Create new destination
    pub fn new(address: LedgerAddress, tag: Option<DestinationTag>) -> Self {
        Self { address, tag }
    }

    /// Parse the persisted `address` / `address~tag` form
    pub fn parse(s: &str) -> Result<Self> {
        let (addr, tag) = match s.split_once(TAG_SEPARATOR) {
            Some((addr, tag)) => (addr, Some(DestinationTag::parse(tag)?)),
            None => (s, None),
        };
        let address = LedgerAddress::parse(addr).ok_or_else(|| Error::CorruptValue {
            key: "destination".to_string(),
            value: s.to_string(),
        })?;
        Ok(Self { address, tag })
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag {
            Some(tag) => write!(f, "{}{}{}", self.address, TAG_SEPARATOR, tag),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Whether an address has ever transacted on the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AddressExistence {
    /// Not yet queried
    #[default]
    Unknown,
    /// Confirmed to exist
    Used,
    /// Queried, not found
    Unused,
}

impl AddressExistence {
    /// Decode the cached `true`/`false` string
    pub fn from_stored(value: Option<&str>) -> Self {
        match value {
            Some("true") => AddressExistence::Used,
            Some("false") => AddressExistence::Unused,
            _ => AddressExistence::Unknown,
        }
    }

    /// Cached string form, `None` when unknown
    pub fn to_stored(self) -> Option<&'static str> {
        match self {
            AddressExistence::Used => Some("true"),
            AddressExistence::Unused => Some("false"),
            AddressExistence::Unknown => None,
        }
    }

    /// Convert a ledger query result
    pub fn from_exists(exists: bool) -> Self {
        if exists {
            AddressExistence::Used
        } else {
            AddressExistence::Unused
        }
    }
}

/// One record per counterparty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Counterparty identifier
    pub id: CounterpartyId,
    /// Bound settlement destination (immutable once set)
    pub destination: Option<Destination>,
    /// Credit retained since the last settlement
    pub balance: Drops,
    /// Whether the bound address has been seen on the ledger
    pub address_ever_used: AddressExistence,
}

impl Account {
    /// Fresh account with no binding
    pub fn new(id: CounterpartyId) -> Self {
        Self {
            id,
            destination: None,
            balance: Drops::ZERO,
            address_ever_used: AddressExistence::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: &str = "rHb9CJAWyB4rj91VRWn96DkukG4bwdtyTh";

    #[test]
    fn test_destination_tag_range() {
        assert_eq!(DestinationTag::parse("0").unwrap().get(), 0);
        assert_eq!(DestinationTag::parse("4294967295").unwrap().get(), u32::MAX);
        assert!(matches!(
            DestinationTag::parse("4294967296"),
            Err(Error::InvalidDestinationTag(_))
        ));
        assert!(DestinationTag::parse("-1").is_err());
        assert!(DestinationTag::parse("12a").is_err());
        assert!(DestinationTag::parse("").is_err());
    }

    #[test]
    fn test_destination_display_parse() {
        let address = LedgerAddress::parse(ADDR).unwrap();
        let plain = Destination::new(address.clone(), None);
        assert_eq!(plain.to_string(), ADDR);
        assert_eq!(Destination::parse(ADDR).unwrap(), plain);

        let tagged = Destination::new(address, Some(DestinationTag::new(42)));
        assert_eq!(tagged.to_string(), format!("{}~42", ADDR));
        assert_eq!(Destination::parse(&tagged.to_string()).unwrap(), tagged);
    }

    #[test]
    fn test_drops_serde_as_string() {
        let drops = Drops::new(340_282_366_920_938_463_463_374_607_431_768_211_455);
        let json = serde_json::to_string(&drops).unwrap();
        assert_eq!(json, "\"340282366920938463463374607431768211455\"");
        let back: Drops = serde_json::from_str(&json).unwrap();
        assert_eq!(back, drops);
        assert!(drops.checked_add(Drops::new(1)).is_err());
    }

    #[test]
    fn test_synthetic_ids() {
        let dest = Destination::parse(ADDR).unwrap();
        let id = CounterpartyId::synthetic(&dest);
        assert!(id.is_synthetic());
        assert!(!CounterpartyId::new("alice").is_synthetic());
    }

    #[test]
    fn test_address_existence_stored() {
        assert_eq!(AddressExistence::from_stored(Some("true")), AddressExistence::Used);
        assert_eq!(AddressExistence::from_stored(Some("false")), AddressExistence::Unused);
        assert_eq!(AddressExistence::from_stored(None), AddressExistence::Unknown);
        assert_eq!(AddressExistence::Unknown.to_stored(), None);
    }
}
