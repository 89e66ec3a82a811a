//! Settlement scheduler
//!
//! Per-destination state machine deciding, after every credit, whether to
//! settle now, merge into a debounced pending settlement, or wait.
//!
//! ```text
//!   Idle ──(surplus > cutoff)──────────────▶ Settling ──(validated/failed)──▶ Idle
//!    │                                          ▲
//!    └──(surplus ≤ cutoff)──▶ Deferred ──(timer)─┘
//!                               │  ▲
//!                               └──┘ (another surplus: amounts merge)
//! ```
//!
//! # Serialization
//!
//! Each destination has one async mutex. "Credit, decide, reset, schedule"
//! runs entirely under it, as do timer firings and settlement completion, so
//! several accounts aliasing one address can never interleave and no
//! destination ever has two settlements in flight. A credit that arrives
//! while a settlement is in flight starts a new accumulation; if it also
//! triggers settlement, the amount waits as a due pending settlement and is
//! submitted once the in-flight attempt completes.
//!
//! # Durability
//!
//! The balance reset is durable before anything is scheduled. The pending
//! amount and its absolute deadline are persisted next, and cleared when the
//! settlement is submitted. A crash between the two writes loses the amount
//! from local bookkeeping instead of settling it twice.
//!
//! Once the reset has succeeded the credit is never reported as failed:
//! pending-record writes that fail are logged and scheduling carries on from
//! memory. If the reset itself fails, the credit stays on the account and is
//! swept by a later credit.

use crate::{
    config::SettlementConfig,
    ledger_client::LedgerClient,
    metrics::Metrics,
    tracker::{SettlementReceipt, TransactionTracker},
    Result,
};
use account_ledger::{
    storage::keys, AccountHandle, AddressExistence, CachedStore, CounterpartyId, Destination,
    Drops, LedgerAddress,
};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Thresholds and debounce delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementPolicy {
    /// Configured settlement threshold
    pub threshold: Drops,
    /// Merged amount above which settlement skips the debounce
    pub funding_cutoff: Drops,
    /// Debounce delay
    pub debounce: Duration,
}

impl SettlementPolicy {
    /// Policy from configuration
    pub fn from_config(config: &SettlementConfig) -> Self {
        Self {
            threshold: config.threshold(),
            funding_cutoff: config.funding_cutoff(),
            debounce: config.debounce(),
        }
    }

    /// Threshold that applies given what is known about the destination
    ///
    /// Until the address is confirmed to exist, credit is bounded by the
    /// funding cutoff as well.
    pub fn effective_threshold(&self, existence: AddressExistence) -> Drops {
        match existence {
            AddressExistence::Used => self.threshold,
            AddressExistence::Unknown | AddressExistence::Unused => {
                self.threshold.min(self.funding_cutoff)
            }
        }
    }

    /// Decide what a balance means for its destination
    pub fn decide(&self, balance: Drops, pending: Drops, existence: AddressExistence) -> Decision {
        if balance <= self.effective_threshold(existence) {
            return Decision::Wait;
        }

        let merged = Drops::new(balance.get().saturating_add(pending.get()));
        if merged > self.funding_cutoff {
            Decision::SettleNow(merged)
        } else {
            Decision::Defer(merged)
        }
    }
}

/// Outcome of evaluating a credit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Below threshold; keep accumulating
    Wait,
    /// Settle this merged amount without waiting
    SettleNow(Drops),
    /// Hold this merged amount until the debounce timer fires
    Defer(Drops),
}

/// Result of [`SettlementScheduler::on_credit`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditOutcome {
    /// Account balance after the credit (zero if it was swept for settlement)
    pub balance: Drops,
    /// What the scheduler decided
    pub decision: Decision,
}

/// Completed settlement attempt, successful or not
#[derive(Debug)]
pub struct SettlementOutcome {
    /// Where the payment went
    pub destination: Destination,
    /// Amount attempted
    pub amount: Drops,
    /// Receipt or the failure
    pub result: Result<SettlementReceipt>,
}

/// Observable state of one destination
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationSnapshot {
    /// Deferred amount, if any
    pub pending: Option<Drops>,
    /// Absolute deadline of the deferred settlement
    pub deadline: Option<DateTime<Utc>>,
    /// Whether a settlement is awaiting validation
    pub in_flight: bool,
}

/// Persisted form of a deferred settlement
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PendingRecord {
    amount: Drops,
    deadline: DateTime<Utc>,
}

#[derive(Debug)]
struct PendingSettlement {
    amount: Drops,
    deadline: DateTime<Utc>,
    /// Timer elapsed (or immediate settlement requested) while a settlement was in flight
    due: bool,
    timer: Option<JoinHandle<()>>,
}

#[derive(Debug, Default)]
struct DestinationState {
    pending: Option<PendingSettlement>,
    in_flight: bool,
    /// Bumped whenever a pending settlement is superseded; stale timers compare and bail
    generation: u64,
}

/// Per-destination settlement scheduler
pub struct SettlementScheduler {
    accounts: AccountHandle,
    store: CachedStore,
    client: Arc<dyn LedgerClient>,
    tracker: Arc<TransactionTracker>,
    source: LedgerAddress,
    policy: SettlementPolicy,
    metrics: Metrics,
    destinations: DashMap<Destination, Arc<Mutex<DestinationState>>>,
    index_lock: parking_lot::Mutex<()>,
    outcomes: Option<mpsc::UnboundedSender<SettlementOutcome>>,
}

impl std::fmt::Debug for SettlementScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementScheduler")
            .field("source", &self.source)
            .field("policy", &self.policy)
            .field("destinations", &self.destinations.len())
            .finish()
    }
}

impl SettlementScheduler {
    /// Create new scheduler
    pub fn new(
        accounts: AccountHandle,
        store: CachedStore,
        client: Arc<dyn LedgerClient>,
        tracker: Arc<TransactionTracker>,
        source: LedgerAddress,
        policy: SettlementPolicy,
        metrics: Metrics,
    ) -> Self {
        Self {
            accounts,
            store,
            client,
            tracker,
            source,
            policy,
            metrics,
            destinations: DashMap::new(),
            index_lock: parking_lot::Mutex::new(()),
            outcomes: None,
        }
    }

    /// Report every completed settlement attempt on `sink`
    pub fn with_outcome_sink(mut self, sink: mpsc::UnboundedSender<SettlementOutcome>) -> Self {
        self.outcomes = Some(sink);
        self
    }

    /// Active policy
    pub fn policy(&self) -> &SettlementPolicy {
        &self.policy
    }

    fn slot(&self, destination: &Destination) -> Arc<Mutex<DestinationState>> {
        self.destinations
            .entry(destination.clone())
            .or_default()
            .clone()
    }

    /// Credit an account and act on the resulting balance
    ///
    /// This is the serialization point for the destination: the credit, the
    /// decision and any reset happen as one unit.
    pub async fn on_credit(
        self: &Arc<Self>,
        id: &CounterpartyId,
        destination: &Destination,
        amount: Drops,
    ) -> Result<CreditOutcome> {
        let slot = self.slot(destination);
        let mut state = slot.lock().await;

        let existence = self.ensure_existence(id, destination).await?;
        let balance = self.accounts.credit(id, amount).await?;
        let pending = state.pending.as_ref().map_or(Drops::ZERO, |p| p.amount);
        let decision = self.policy.decide(balance, pending, existence);

        debug!(
            counterparty = %id,
            destination = %destination,
            amount = %amount,
            balance = %balance,
            ?existence,
            ?decision,
            "Credit evaluated"
        );

        if decision == Decision::Wait {
            return Ok(CreditOutcome { balance, decision });
        }

        // The claim is credited from here on; later failures never reach the caller
        let prior = match self.accounts.reset_to_zero(id).await {
            Ok(prior) => prior,
            Err(e) => {
                error!(
                    counterparty = %id,
                    balance = %balance,
                    "Balance reset failed, retaining credit: {}",
                    e
                );
                return Ok(CreditOutcome {
                    balance,
                    decision: Decision::Wait,
                });
            }
        };

        match decision {
            Decision::Wait => {}
            Decision::SettleNow(_) => {
                let carried = self.supersede_pending(&mut state);
                let merged = Drops::new(carried.get().saturating_add(prior.get()));

                if state.in_flight {
                    info!(
                        destination = %destination,
                        amount = %merged,
                        "Settlement in flight, queueing next settlement"
                    );
                    self.put_pending(&mut state, destination, merged, Utc::now(), true, None);
                } else {
                    self.clear_pending_or_log(destination);
                    self.start_settlement(&mut state, destination, merged);
                }
            }
            Decision::Defer(_) => match state.pending.as_mut() {
                Some(existing) => {
                    existing.amount = Drops::new(existing.amount.get().saturating_add(prior.get()));
                    let record = PendingRecord {
                        amount: existing.amount,
                        deadline: existing.deadline,
                    };
                    info!(
                        destination = %destination,
                        amount = %record.amount,
                        deadline = %record.deadline,
                        "Merged into deferred settlement"
                    );
                    self.persist_pending_or_log(destination, &record);
                }
                None => {
                    let debounce = chrono::Duration::from_std(self.policy.debounce)
                        .unwrap_or_else(|_| chrono::Duration::zero());
                    let deadline = Utc::now() + debounce;
                    state.generation += 1;
                    let timer =
                        self.arm_timer(destination, state.generation, Instant::now() + self.policy.debounce);
                    info!(
                        destination = %destination,
                        amount = %prior,
                        deadline = %deadline,
                        "Settlement deferred"
                    );
                    self.put_pending(&mut state, destination, prior, deadline, false, Some(timer));
                }
            },
        }

        Ok(CreditOutcome {
            balance: Drops::ZERO,
            decision,
        })
    }

    /// Existence of the destination address, querying the ledger once if unknown
    async fn ensure_existence(
        &self,
        id: &CounterpartyId,
        destination: &Destination,
    ) -> Result<AddressExistence> {
        let known = self.accounts.address_ever_used(id).await?;
        if known != AddressExistence::Unknown {
            return Ok(known);
        }

        match self.client.query_account_exists(&destination.address).await {
            Ok(exists) => Ok(self
                .accounts
                .record_address_existence(&destination.address, exists)
                .await?),
            Err(e) => {
                warn!(
                    address = %destination.address,
                    "Existence query failed, treating address as unconfirmed: {}",
                    e
                );
                Ok(AddressExistence::Unknown)
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, destination: &Destination, generation: u64, fire_at: Instant) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let destination = destination.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(fire_at).await;
            this.fire(&destination, generation).await;
        })
    }

    async fn fire(self: &Arc<Self>, destination: &Destination, generation: u64) {
        let slot = self.slot(destination);
        let mut state = slot.lock().await;

        if state.generation != generation {
            debug!(destination = %destination, "Stale debounce timer ignored");
            return;
        }

        let in_flight = state.in_flight;
        match state.pending.as_mut() {
            None => return,
            Some(pending) if in_flight => {
                debug!(destination = %destination, "Debounce elapsed during in-flight settlement");
                pending.due = true;
                pending.timer = None;
                return;
            }
            Some(_) => {}
        }

        if let Some(pending) = self.take_pending(&mut state) {
            info!(destination = %destination, amount = %pending.amount, "Debounce elapsed, settling");
            self.clear_pending_or_log(destination);
            self.start_settlement(&mut state, destination, pending.amount);
        }
    }

    fn start_settlement(self: &Arc<Self>, state: &mut DestinationState, destination: &Destination, amount: Drops) {
        if amount.is_zero() {
            return;
        }

        state.in_flight = true;
        self.metrics.record_submission();

        let this = Arc::clone(self);
        let destination = destination.clone();
        tokio::spawn(async move {
            let result = this.tracker.submit(&this.source, &destination, amount).await;
            this.complete(destination, amount, result).await;
        });
    }

    async fn complete(self: &Arc<Self>, destination: Destination, amount: Drops, result: Result<SettlementReceipt>) {
        match &result {
            Ok(receipt) => {
                info!(
                    transaction_id = %receipt.transaction_id,
                    destination = %destination,
                    amount = %amount,
                    "Settlement validated"
                );
                // Our own payment proves the address exists now
                if let Err(e) = self
                    .accounts
                    .record_address_existence(&destination.address, true)
                    .await
                {
                    warn!(address = %destination.address, "Failed to cache address existence: {}", e);
                }
            }
            Err(e) => {
                // Never re-credited; the payment may still have gone through
                error!(
                    destination = %destination,
                    amount = %amount,
                    "Settlement failed, amount not re-credited: {}",
                    e
                );
            }
        }
        self.metrics.record_outcome(result.is_ok());

        {
            let slot = self.slot(&destination);
            let mut state = slot.lock().await;
            state.in_flight = false;

            let due = state.pending.as_ref().map_or(false, |p| p.due);
            if due {
                if let Some(next) = self.take_pending(&mut state) {
                    info!(destination = %destination, amount = %next.amount, "Starting queued settlement");
                    self.clear_pending_or_log(&destination);
                    self.start_settlement(&mut state, &destination, next.amount);
                }
            }
        }

        if let Some(sink) = &self.outcomes {
            let _ = sink.send(SettlementOutcome {
                destination,
                amount,
                result,
            });
        }
    }

    /// Cancel any pending settlement, returning its amount
    fn supersede_pending(&self, state: &mut DestinationState) -> Drops {
        state.generation += 1;
        match self.take_pending(state) {
            Some(pending) => {
                if let Some(timer) = pending.timer {
                    timer.abort();
                }
                pending.amount
            }
            None => Drops::ZERO,
        }
    }

    fn take_pending(&self, state: &mut DestinationState) -> Option<PendingSettlement> {
        let pending = state.pending.take();
        if pending.is_some() {
            self.metrics.pending_destinations.dec();
        }
        pending
    }

    /// Install a pending settlement; the in-memory entry stands even if persisting it fails
    fn put_pending(
        &self,
        state: &mut DestinationState,
        destination: &Destination,
        amount: Drops,
        deadline: DateTime<Utc>,
        due: bool,
        timer: Option<JoinHandle<()>>,
    ) {
        if state.pending.is_none() {
            self.metrics.pending_destinations.inc();
        }
        state.pending = Some(PendingSettlement {
            amount,
            deadline,
            due,
            timer,
        });
        self.persist_pending_or_log(destination, &PendingRecord { amount, deadline });
    }

    fn persist_pending_or_log(&self, destination: &Destination, record: &PendingRecord) {
        if let Err(e) = self.persist_pending(destination, record) {
            error!(
                destination = %destination,
                amount = %record.amount,
                "Failed to persist pending settlement, it will not survive a restart: {}",
                e
            );
        }
    }

    fn clear_pending_or_log(&self, destination: &Destination) {
        if let Err(e) = self.clear_pending_record(destination) {
            error!(destination = %destination, "Failed to clear pending record: {}", e);
        }
    }

    fn persist_pending(&self, destination: &Destination, record: &PendingRecord) -> Result<()> {
        let key = keys::pending(destination);
        self.store.load(&key)?;
        let value = serde_json::to_string(record).map_err(account_ledger::Error::from)?;
        self.store.set(&key, &value)?;
        self.update_index(|index| {
            let entry = destination.to_string();
            if !index.contains(&entry) {
                index.push(entry);
            }
        })
    }

    fn clear_pending_record(&self, destination: &Destination) -> Result<()> {
        let key = keys::pending(destination);
        if self.store.fetch(&key)?.map_or(true, |v| v.is_empty()) {
            return Ok(());
        }
        self.store.set(&key, "")?;
        let entry = destination.to_string();
        self.update_index(|index| index.retain(|d| *d != entry))
    }

    fn update_index(&self, edit: impl FnOnce(&mut Vec<String>)) -> Result<()> {
        let _guard = self.index_lock.lock();
        let mut index = self.read_index()?;
        edit(&mut index);
        let value = serde_json::to_string(&index).map_err(account_ledger::Error::from)?;
        self.store.set(keys::PENDING_INDEX, &value)?;
        Ok(())
    }

    fn read_index(&self) -> Result<Vec<String>> {
        match self.store.fetch(keys::PENDING_INDEX)? {
            Some(raw) if !raw.is_empty() => serde_json::from_str(&raw).map_err(|_| {
                account_ledger::Error::CorruptValue {
                    key: keys::PENDING_INDEX.to_string(),
                    value: raw,
                }
                .into()
            }),
            _ => Ok(Vec::new()),
        }
    }

    /// Re-arm deferred settlements persisted before a restart
    ///
    /// Overdue settlements fire immediately; the rest wait out their remaining delay.
    pub async fn recover(self: &Arc<Self>) -> Result<usize> {
        let mut recovered = 0;
        for entry in self.read_index()? {
            let destination = match Destination::parse(&entry) {
                Ok(destination) => destination,
                Err(e) => {
                    error!(entry = %entry, "Skipping unreadable pending destination: {}", e);
                    continue;
                }
            };

            let key = keys::pending(&destination);
            let record: PendingRecord = match self.store.fetch(&key)? {
                Some(raw) if !raw.is_empty() => match serde_json::from_str(&raw) {
                    Ok(record) => record,
                    Err(e) => {
                        error!(destination = %destination, "Skipping unreadable pending record: {}", e);
                        continue;
                    }
                },
                _ => continue,
            };
            if record.amount.is_zero() {
                continue;
            }

            let remaining = (record.deadline - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            let slot = self.slot(&destination);
            let mut state = slot.lock().await;
            state.generation += 1;
            let timer = self.arm_timer(&destination, state.generation, Instant::now() + remaining);

            info!(
                destination = %destination,
                amount = %record.amount,
                remaining_ms = remaining.as_millis() as u64,
                "Recovered deferred settlement"
            );
            if state.pending.is_none() {
                self.metrics.pending_destinations.inc();
            }
            state.pending = Some(PendingSettlement {
                amount: record.amount,
                deadline: record.deadline,
                due: false,
                timer: Some(timer),
            });
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Current state of a destination
    pub async fn snapshot(&self, destination: &Destination) -> DestinationSnapshot {
        let slot = self.slot(destination);
        let state = slot.lock().await;
        DestinationSnapshot {
            pending: state.pending.as_ref().map(|p| p.amount),
            deadline: state.pending.as_ref().map(|p| p.deadline),
            in_flight: state.in_flight,
        }
    }

    /// Stop every debounce timer; persisted records stay for [`Self::recover`]
    pub async fn shutdown(&self) {
        let slots: Vec<_> = self.destinations.iter().map(|e| e.value().clone()).collect();
        for slot in slots {
            let mut state = slot.lock().await;
            state.generation += 1;
            if let Some(timer) = state.pending.as_mut().and_then(|p| p.timer.take()) {
                timer.abort();
            }
        }
    }
}
