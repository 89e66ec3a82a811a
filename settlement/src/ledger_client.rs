//! Ledger client adapter seam
//!
//! The engine never talks to the value-transfer ledger directly. Everything
//! it needs (subscription, payment preparation and signing, submission,
//! existence queries) goes through [`LedgerClient`].

pub mod simulated;

use crate::{Error, Result};
use account_ledger::{Destination, Drops, LedgerAddress};
use async_trait::async_trait;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::fmt;
use std::pin::Pin;
use tokio_stream::Stream;

pub use simulated::SimulatedLedger;

/// Drops per display unit
pub const DROPS_PER_XRP: u64 = 1_000_000;

/// Engine result code of a successfully applied transaction
pub const SUCCESS_RESULT: &str = "tesSUCCESS";

/// Prefix hashed ahead of a signed transaction to derive its id
const TRANSACTION_ID_PREFIX: [u8; 4] = *b"TXN\0";

/// Stream of validated-transaction notifications
pub type NotificationStream = Pin<Box<dyn Stream<Item = TransactionNotification> + Send>>;

/// Process-wide signing secret; never printed
#[derive(Clone, PartialEq, Eq)]
pub struct SigningSecret(String);

impl SigningSecret {
    /// Wrap a secret
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// Raw secret for the adapter
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SigningSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SigningSecret(***)")
    }
}

/// Amount of the native asset in display denomination
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NativeAmount {
    /// Always `XRP`
    pub currency: String,
    /// Decimal display value
    pub value: Decimal,
}

impl NativeAmount {
    /// Convert drops to display denomination
    pub fn from_drops(drops: Drops) -> Result<Self> {
        let mantissa = i128::try_from(drops.get())
            .map_err(|_| Error::Other(format!("amount {} out of range", drops)))?;
        let value = Decimal::try_from_i128_with_scale(mantissa, 6)
            .map_err(|e| Error::Other(format!("amount {} out of range: {}", drops, e)))?;
        Ok(Self {
            currency: "XRP".to_string(),
            value: value.normalize(),
        })
    }

    /// Convert back to drops, `None` if fractional below one drop or negative
    pub fn to_drops(&self) -> Option<Drops> {
        let scaled = self.value.checked_mul(Decimal::from(DROPS_PER_XRP))?;
        if scaled.fract() != Decimal::ZERO {
            return None;
        }
        scaled.to_u128().map(Drops::new)
    }
}

/// Payment source half
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSource {
    /// Paying address
    pub address: LedgerAddress,
    /// Most the source may spend
    pub max_amount: NativeAmount,
}

/// Payment destination half
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDestination {
    /// Receiving address
    pub address: LedgerAddress,
    /// Exact amount delivered
    pub amount: NativeAmount,
    /// Optional destination tag
    pub tag: Option<u32>,
}

/// Payment description handed to the adapter for preparation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDescription {
    /// Source
    pub source: PaymentSource,
    /// Destination
    pub destination: PaymentDestination,
}

impl PaymentDescription {
    /// Single-asset payment: max spend equals delivered amount
    pub fn native(source: &LedgerAddress, destination: &Destination, amount: Drops) -> Result<Self> {
        let amount = NativeAmount::from_drops(amount)?;
        Ok(Self {
            source: PaymentSource {
                address: source.clone(),
                max_amount: amount.clone(),
            },
            destination: PaymentDestination {
                address: destination.address.clone(),
                amount,
                tag: destination.tag.map(|t| t.get()),
            },
        })
    }
}

/// Output of preparation and signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    /// Transaction id as reported by the adapter
    pub transaction_id: String,
    /// Serialized signed transaction
    pub signed_payload: Vec<u8>,
}

/// Validated-transaction notification from an address subscription
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionNotification {
    /// Transaction hash
    pub transaction_id: String,
    /// Engine result code (`tesSUCCESS` on success)
    pub engine_result: String,
}

impl TransactionNotification {
    /// Whether the ledger applied the transaction
    pub fn is_success(&self) -> bool {
        self.engine_result == SUCCESS_RESULT
    }
}

/// Canonical transaction id: upper-hex of the first half of
/// SHA-512(`TXN\0` || signed payload)
pub fn transaction_id(signed_payload: &[u8]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(TRANSACTION_ID_PREFIX);
    hasher.update(signed_payload);
    let digest = hasher.finalize();
    hex::encode_upper(&digest[..32])
}

/// Ledger client adapter
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// Open the ledger connection
    async fn connect(&self) -> Result<()>;

    /// Validated transactions touching `address`
    async fn subscribe_address_activity(&self, address: &LedgerAddress) -> Result<NotificationStream>;

    /// Prepare and sign a payment with `secret`
    async fn prepare_and_sign_payment(
        &self,
        payment: &PaymentDescription,
        secret: &SigningSecret,
    ) -> Result<SignedTransaction>;

    /// Submit a signed payload; returns the preliminary engine result
    async fn submit(&self, signed_payload: &[u8]) -> Result<String>;

    /// Whether `address` has ever transacted
    async fn query_account_exists(&self, address: &LedgerAddress) -> Result<bool>;
}
