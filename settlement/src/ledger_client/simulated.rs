//! In-process simulated ledger
//!
//! Stands in for a real ledger connection in standalone mode and in tests:
//! signs payments with an Ed25519 key derived from the secret, checks the
//! signature on submit, and streams one validated-transaction notification
//! per submission to subscribers of either party.

use super::{
    transaction_id, LedgerClient, NotificationStream, PaymentDescription, SignedTransaction,
    SigningSecret, TransactionNotification, SUCCESS_RESULT,
};
use crate::{Error, Result};
use account_ledger::{Drops, LedgerAddress};
use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Payment fields covered by the signature
#[derive(Debug, Clone, Serialize, Deserialize)]
struct UnsignedPayment {
    account: LedgerAddress,
    destination: LedgerAddress,
    destination_tag: Option<u32>,
    amount: Drops,
    send_max: Drops,
    sequence: u32,
}

/// Wire form of a signed payment
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SignedPayment {
    #[serde(flatten)]
    payment: UnsignedPayment,
    signing_pub_key: String,
    txn_signature: String,
}

/// A payment the simulated ledger accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedPayment {
    /// Transaction hash
    pub transaction_id: String,
    /// Paying address
    pub source: LedgerAddress,
    /// Receiving address
    pub destination: LedgerAddress,
    /// Destination tag
    pub destination_tag: Option<u32>,
    /// Delivered amount
    pub amount: Drops,
}

#[derive(Debug, Clone)]
struct LedgerEvent {
    accounts: [LedgerAddress; 2],
    notification: TransactionNotification,
}

/// Simulated ledger client
#[derive(Debug)]
pub struct SimulatedLedger {
    connected: AtomicBool,
    refuse_connect: AtomicBool,
    hold_confirmations: AtomicBool,
    fail_existence: AtomicBool,
    existence_queries: AtomicU32,
    sequence: AtomicU32,
    existing: RwLock<HashSet<LedgerAddress>>,
    preliminary: Mutex<VecDeque<String>>,
    results: Mutex<VecDeque<String>>,
    submitted: Mutex<Vec<SubmittedPayment>>,
    held: Mutex<Vec<LedgerEvent>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl Default for SimulatedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedLedger {
    /// Create an empty ledger
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            connected: AtomicBool::new(false),
            refuse_connect: AtomicBool::new(false),
            hold_confirmations: AtomicBool::new(false),
            fail_existence: AtomicBool::new(false),
            existence_queries: AtomicU32::new(0),
            sequence: AtomicU32::new(1),
            existing: RwLock::new(HashSet::new()),
            preliminary: Mutex::new(VecDeque::new()),
            results: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
            held: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Mark an address as existing on the ledger
    pub fn fund(&self, address: &LedgerAddress) {
        self.existing.write().insert(address.clone());
    }

    /// Make `connect` fail
    pub fn refuse_connections(&self) {
        self.refuse_connect.store(true, Ordering::SeqCst);
    }

    /// Engine result for the next submission (defaults to success)
    pub fn push_result(&self, engine_result: impl Into<String>) {
        self.results.lock().push_back(engine_result.into());
    }

    /// Preliminary result for the next submission; the payment is then
    /// neither recorded nor announced
    pub fn push_preliminary(&self, preliminary: impl Into<String>) {
        self.preliminary.lock().push_back(preliminary.into());
    }

    /// Make existence queries fail
    pub fn fail_existence_queries(&self, fail: bool) {
        self.fail_existence.store(fail, Ordering::SeqCst);
    }

    /// Existence queries received so far, failed ones included
    pub fn existence_queries(&self) -> u32 {
        self.existence_queries.load(Ordering::SeqCst)
    }

    /// Queue notifications instead of emitting them
    pub fn hold_confirmations(&self, hold: bool) {
        self.hold_confirmations.store(hold, Ordering::SeqCst);
    }

    /// Emit every held notification
    pub fn release_held(&self) {
        let held: Vec<_> = self.held.lock().drain(..).collect();
        for event in held {
            let _ = self.events.send(event);
        }
    }

    /// Inject an arbitrary notification for `address` subscribers
    pub fn emit(&self, address: &LedgerAddress, notification: TransactionNotification) {
        let _ = self.events.send(LedgerEvent {
            accounts: [address.clone(), address.clone()],
            notification,
        });
    }

    /// Everything submitted so far
    pub fn submitted(&self) -> Vec<SubmittedPayment> {
        self.submitted.lock().clone()
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.connected.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::LedgerClient("not connected".to_string()))
        }
    }

    fn signing_key(secret: &SigningSecret) -> SigningKey {
        let seed: [u8; 32] = Sha256::digest(secret.expose().as_bytes()).into();
        SigningKey::from_bytes(&seed)
    }

    fn verify(signed: &SignedPayment) -> bool {
        let Ok(message) = serde_json::to_vec(&signed.payment) else {
            return false;
        };
        let key_bytes: Option<[u8; 32]> = hex::decode(&signed.signing_pub_key)
            .ok()
            .and_then(|b| b.try_into().ok());
        let sig_bytes: Option<[u8; 64]> = hex::decode(&signed.txn_signature)
            .ok()
            .and_then(|b| b.try_into().ok());

        match (key_bytes, sig_bytes) {
            (Some(key), Some(sig)) => VerifyingKey::from_bytes(&key)
                .map(|key| key.verify(&message, &Signature::from_bytes(&sig)).is_ok())
                .unwrap_or(false),
            _ => false,
        }
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn connect(&self) -> Result<()> {
        if self.refuse_connect.load(Ordering::SeqCst) {
            return Err(Error::LedgerClient("connection refused".to_string()));
        }
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Simulated ledger connected");
        Ok(())
    }

    async fn subscribe_address_activity(&self, address: &LedgerAddress) -> Result<NotificationStream> {
        self.ensure_connected()?;
        let address = address.clone();
        let stream = BroadcastStream::new(self.events.subscribe()).filter_map(move |item| {
            match item {
                Ok(event) if event.accounts.contains(&address) => Some(event.notification),
                _ => None,
            }
        });
        Ok(Box::pin(stream))
    }

    async fn prepare_and_sign_payment(
        &self,
        payment: &PaymentDescription,
        secret: &SigningSecret,
    ) -> Result<SignedTransaction> {
        self.ensure_connected()?;

        let amount = payment
            .destination
            .amount
            .to_drops()
            .ok_or_else(|| Error::LedgerClient("amount is not a whole number of drops".to_string()))?;
        let send_max = payment
            .source
            .max_amount
            .to_drops()
            .ok_or_else(|| Error::LedgerClient("max amount is not a whole number of drops".to_string()))?;

        let unsigned = UnsignedPayment {
            account: payment.source.address.clone(),
            destination: payment.destination.address.clone(),
            destination_tag: payment.destination.tag,
            amount,
            send_max,
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst),
        };

        let key = Self::signing_key(secret);
        let message = serde_json::to_vec(&unsigned).map_err(|e| Error::LedgerClient(e.to_string()))?;
        let signature = key.sign(&message);

        let signed = SignedPayment {
            payment: unsigned,
            signing_pub_key: hex::encode(key.verifying_key().to_bytes()),
            txn_signature: hex::encode(signature.to_bytes()),
        };
        let signed_payload =
            serde_json::to_vec(&signed).map_err(|e| Error::LedgerClient(e.to_string()))?;

        Ok(SignedTransaction {
            transaction_id: transaction_id(&signed_payload),
            signed_payload,
        })
    }

    async fn submit(&self, signed_payload: &[u8]) -> Result<String> {
        self.ensure_connected()?;

        let signed: SignedPayment = serde_json::from_slice(signed_payload)
            .map_err(|e| Error::LedgerClient(format!("malformed transaction: {}", e)))?;
        if !Self::verify(&signed) {
            return Ok("temBAD_SIGNATURE".to_string());
        }

        if let Some(preliminary) = self.preliminary.lock().pop_front() {
            return Ok(preliminary);
        }

        let id = transaction_id(signed_payload);
        let engine_result = self
            .results
            .lock()
            .pop_front()
            .unwrap_or_else(|| SUCCESS_RESULT.to_string());

        if engine_result == SUCCESS_RESULT {
            self.fund(&signed.payment.destination);
        }

        self.submitted.lock().push(SubmittedPayment {
            transaction_id: id.clone(),
            source: signed.payment.account.clone(),
            destination: signed.payment.destination.clone(),
            destination_tag: signed.payment.destination_tag,
            amount: signed.payment.amount,
        });

        let event = LedgerEvent {
            accounts: [signed.payment.account, signed.payment.destination],
            notification: TransactionNotification {
                transaction_id: id,
                engine_result,
            },
        };
        if self.hold_confirmations.load(Ordering::SeqCst) {
            self.held.lock().push(event);
        } else {
            let _ = self.events.send(event);
        }

        Ok(SUCCESS_RESULT.to_string())
    }

    async fn query_account_exists(&self, address: &LedgerAddress) -> Result<bool> {
        self.ensure_connected()?;
        self.existence_queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_existence.load(Ordering::SeqCst) {
            return Err(Error::LedgerClient("account_info timed out".to_string()));
        }
        Ok(self.existing.read().contains(address))
    }
}
