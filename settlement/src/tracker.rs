//! Transaction tracker
//!
//! Correlates submitted settlement transactions with validated-transaction
//! notifications from the ledger subscription.
//!
//! # Lifecycle
//!
//! 1. Prepare and sign through the [`LedgerClient`]
//! 2. Derive the canonical transaction id from the signed payload
//! 3. Register a resolver under that id, then submit
//! 4. Await resolution, bounded by the confirmation timeout
//!
//! A notification resolves its entry and removes it, so each entry resolves
//! at most once. Notifications with no entry (replays, unrelated activity on
//! the source address, duplicates) are ignored.

use crate::{
    ledger_client::{transaction_id, LedgerClient, PaymentDescription, SigningSecret, TransactionNotification},
    Error, Result,
};
use account_ledger::{Destination, Drops, LedgerAddress};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

/// Preliminary result classes that guarantee the transaction never validates
const TERMINAL_PRELIMINARY: [&str; 3] = ["tem", "tef", "tel"];

/// Successful settlement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementReceipt {
    /// Transaction hash
    pub transaction_id: String,
    /// Where the payment went
    pub destination: Destination,
    /// Amount delivered
    pub amount: Drops,
}

/// Outstanding settlement attempts keyed by transaction id
pub struct TransactionTracker {
    client: Arc<dyn LedgerClient>,
    secret: Arc<SigningSecret>,
    in_flight: Mutex<HashMap<String, oneshot::Sender<TransactionNotification>>>,
    confirmation_timeout: Duration,
}

impl std::fmt::Debug for TransactionTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionTracker")
            .field("in_flight", &self.in_flight.lock().len())
            .field("confirmation_timeout", &self.confirmation_timeout)
            .finish()
    }
}

impl TransactionTracker {
    /// Create new tracker
    pub fn new(
        client: Arc<dyn LedgerClient>,
        secret: Arc<SigningSecret>,
        confirmation_timeout: Duration,
    ) -> Self {
        Self {
            client,
            secret,
            in_flight: Mutex::new(HashMap::new()),
            confirmation_timeout,
        }
    }

    /// Number of unresolved submissions
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Pay `amount` from `source` to `destination` and wait for validation
    pub async fn submit(
        &self,
        source: &LedgerAddress,
        destination: &Destination,
        amount: Drops,
    ) -> Result<SettlementReceipt> {
        let payment = PaymentDescription::native(source, destination, amount)?;
        let signed = self
            .client
            .prepare_and_sign_payment(&payment, &self.secret)
            .await?;

        let id = transaction_id(&signed.signed_payload);
        if id != signed.transaction_id {
            tracing::warn!(
                adapter_id = %signed.transaction_id,
                derived_id = %id,
                "Adapter transaction id differs from payload hash, tracking payload hash"
            );
        }

        let (tx, rx) = oneshot::channel();
        self.in_flight.lock().insert(id.clone(), tx);

        tracing::info!(
            transaction_id = %id,
            destination = %destination,
            amount = %amount,
            "Submitting settlement"
        );

        let preliminary = match self.client.submit(&signed.signed_payload).await {
            Ok(result) => result,
            Err(e) => {
                self.in_flight.lock().remove(&id);
                return Err(e);
            }
        };

        if TERMINAL_PRELIMINARY.iter().any(|p| preliminary.starts_with(p)) {
            self.in_flight.lock().remove(&id);
            return Err(Error::SettlementFailed {
                transaction_id: id,
                engine_result: preliminary,
            });
        }

        let notification = match tokio::time::timeout(self.confirmation_timeout, rx).await {
            Ok(Ok(notification)) => notification,
            Ok(Err(_)) => {
                return Err(Error::Other(format!("resolver for {} dropped", id)));
            }
            Err(_) => {
                self.in_flight.lock().remove(&id);
                return Err(Error::SettlementTimeout {
                    transaction_id: id,
                    waited_ms: self.confirmation_timeout.as_millis() as u64,
                });
            }
        };

        if notification.is_success() {
            Ok(SettlementReceipt {
                transaction_id: id,
                destination: destination.clone(),
                amount,
            })
        } else {
            Err(Error::SettlementFailed {
                transaction_id: id,
                engine_result: notification.engine_result,
            })
        }
    }

    /// Resolve the matching entry, if any; returns whether one matched
    pub fn handle_notification(&self, notification: &TransactionNotification) -> bool {
        let resolver = self.in_flight.lock().remove(&notification.transaction_id);
        match resolver {
            Some(tx) => {
                tracing::debug!(
                    transaction_id = %notification.transaction_id,
                    engine_result = %notification.engine_result,
                    "Settlement notification matched"
                );
                // The waiter may already have timed out; nothing left to resolve
                let _ = tx.send(notification.clone());
                true
            }
            None => {
                tracing::trace!(
                    transaction_id = %notification.transaction_id,
                    "Ignoring notification with no in-flight entry"
                );
                false
            }
        }
    }
}
