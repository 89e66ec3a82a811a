//! Main settlement engine
//!
//! Wires the verification gate, account ledger, scheduler and transaction
//! tracker together behind the [`ClaimHandler`] capability.

use crate::{
    config::Config,
    discovery::DiscoveryResolver,
    gate,
    ledger_client::{LedgerClient, SigningSecret},
    metrics::Metrics,
    scheduler::{SettlementOutcome, SettlementPolicy, SettlementScheduler},
    tracker::TransactionTracker,
    transport::{ClaimAck, ClaimHandler, ConnectionRegistry, InboundClaim, SettlementNotice},
    Error, Result,
};
use account_ledger::{
    spawn_account_actor, storage::open_backend, AccountBook, AccountHandle, CachedStore,
    CounterpartyId, Destination, DestinationTag, Drops, LedgerAddress,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

/// Settlement engine
pub struct SettlementEngine {
    /// Account ledger actor
    accounts: AccountHandle,

    /// Ledger client adapter
    client: Arc<dyn LedgerClient>,

    /// In-flight settlement correlation
    tracker: Arc<TransactionTracker>,

    /// Per-destination settlement decisions
    scheduler: Arc<SettlementScheduler>,

    /// Discovery address resolution
    resolver: DiscoveryResolver,

    /// Connected counterparties
    connections: Arc<ConnectionRegistry>,

    /// Metrics
    metrics: Metrics,

    /// Address settlements are paid from
    source: LedgerAddress,

    /// Completed settlements, consumed once started
    outcomes: Mutex<Option<mpsc::UnboundedReceiver<SettlementOutcome>>>,

    /// Background tasks
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for SettlementEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettlementEngine")
            .field("source", &self.source)
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl SettlementEngine {
    /// Create new settlement engine over the configured store
    ///
    /// Must be called inside a Tokio runtime; the account actor is spawned here.
    pub fn new(config: &Config, client: Arc<dyn LedgerClient>) -> Result<Self> {
        let store = CachedStore::new(open_backend(&config.storage)?);
        Self::with_store(config, store, client)
    }

    /// Create new settlement engine over an existing store
    pub fn with_store(
        config: &Config,
        store: CachedStore,
        client: Arc<dyn LedgerClient>,
    ) -> Result<Self> {
        config.validate()?;

        let source = LedgerAddress::parse(&config.ledger.source_address).ok_or_else(|| {
            Error::Config(format!(
                "source_address '{}' is not a valid ledger address",
                config.ledger.source_address
            ))
        })?;
        let metrics =
            Metrics::new().map_err(|e| Error::Other(format!("Failed to create metrics: {}", e)))?;

        let accounts = spawn_account_actor(AccountBook::new(store.clone()));
        let tracker = Arc::new(TransactionTracker::new(
            client.clone(),
            Arc::new(SigningSecret::new(config.ledger.secret.clone())),
            config.settlement.confirmation_timeout(),
        ));

        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(
            SettlementScheduler::new(
                accounts.clone(),
                store,
                client.clone(),
                tracker.clone(),
                source.clone(),
                SettlementPolicy::from_config(&config.settlement),
                metrics.clone(),
            )
            .with_outcome_sink(outcome_tx),
        );

        Ok(Self {
            accounts,
            client,
            tracker,
            scheduler,
            resolver: DiscoveryResolver::new(config.discovery.ilp_prefix.clone()),
            connections: Arc::new(ConnectionRegistry::new()),
            metrics,
            source,
            outcomes: Mutex::new(Some(outcome_rx)),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Connect to the ledger, start confirmation tracking, recover deferred settlements
    ///
    /// A connection or subscription failure is fatal: without a subscription
    /// no settlement could ever be confirmed.
    pub async fn start(&self) -> Result<()> {
        if let Err(e) = self.client.connect().await {
            error!("Ledger connection failed: {}", e);
            return Err(e);
        }

        let mut notifications = self
            .client
            .subscribe_address_activity(&self.source)
            .await
            .map_err(|e| {
                error!(address = %self.source, "Ledger subscription failed: {}", e);
                e
            })?;

        let tracker = self.tracker.clone();
        let pump = tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                tracker.handle_notification(&notification);
            }
            warn!("Ledger notification stream ended");
        });
        self.tasks.lock().push(pump);

        if let Some(mut outcomes) = self.outcomes.lock().take() {
            let connections = self.connections.clone();
            let relay = tokio::spawn(async move {
                while let Some(outcome) = outcomes.recv().await {
                    relay_outcome(&connections, outcome);
                }
            });
            self.tasks.lock().push(relay);
        }

        let recovered = self.scheduler.recover().await?;
        info!(
            source = %self.source,
            recovered,
            "Settlement engine started"
        );
        Ok(())
    }

    /// Stop timers, background tasks and the account actor
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down settlement engine");
        self.scheduler.shutdown().await;
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.accounts.shutdown().await?;
        Ok(())
    }

    /// Handshake and register a counterparty connection in one step
    pub async fn connect_counterparty(
        &self,
        counterparty: &CounterpartyId,
        requested_address: &str,
        requested_tag: Option<&str>,
    ) -> Result<mpsc::UnboundedReceiver<SettlementNotice>> {
        let destination = self
            .on_connection_handshake(counterparty, requested_address, requested_tag)
            .await?;
        Ok(self.connections.on_connect(counterparty, Some(destination)))
    }

    /// Account ledger handle
    pub fn accounts(&self) -> &AccountHandle {
        &self.accounts
    }

    /// Scheduler
    pub fn scheduler(&self) -> &Arc<SettlementScheduler> {
        &self.scheduler
    }

    /// Connection registry used for settlement notices
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    /// Discovery resolver
    pub fn resolver(&self) -> &DiscoveryResolver {
        &self.resolver
    }

    /// Metrics
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Account and destination a claim credits
    async fn resolve_account(&self, claim: &InboundClaim) -> Result<(CounterpartyId, Destination)> {
        if let Some(destination) = self.resolver.resolve(&claim.destination) {
            let id = self.accounts.resolve_or_create_by_address(&destination).await?;
            return Ok((id, destination));
        }

        let account = self.accounts.account(&claim.counterparty).await?;
        let destination = account
            .destination
            .ok_or_else(|| Error::AddressNotBound(claim.counterparty.to_string()))?;
        Ok((account.id, destination))
    }

    async fn credit_claim(&self, claim: &InboundClaim) -> Result<ClaimAck> {
        gate::verify_fulfillment(&claim.execution_condition, &claim.fulfillment)?;

        let (account, destination) = self.resolve_account(claim).await?;
        let outcome = self
            .scheduler
            .on_credit(&account, &destination, Drops::from(claim.amount))
            .await?;

        Ok(ClaimAck {
            account,
            destination,
            balance: outcome.balance,
            decision: outcome.decision,
        })
    }
}

fn relay_outcome(connections: &ConnectionRegistry, outcome: SettlementOutcome) {
    let Ok(receipt) = outcome.result else {
        return;
    };
    let notice = SettlementNotice {
        transaction_id: receipt.transaction_id,
        destination: receipt.destination,
        amount: receipt.amount,
    };
    if let Err(e) = connections.deliver_to_destination(&notice) {
        warn!(
            transaction_id = %notice.transaction_id,
            "Settlement notice not delivered: {}",
            e
        );
    }
}

#[async_trait]
impl ClaimHandler for SettlementEngine {
    async fn on_inbound_claim(&self, claim: InboundClaim) -> Result<ClaimAck> {
        match self.credit_claim(&claim).await {
            Ok(ack) => {
                self.metrics.record_claim(claim.amount);
                info!(
                    counterparty = %claim.counterparty,
                    account = %ack.account,
                    amount = claim.amount,
                    balance = %ack.balance,
                    "Claim credited"
                );
                Ok(ack)
            }
            Err(e) => {
                if e.is_rejection() {
                    self.metrics.record_rejection();
                }
                warn!(
                    counterparty = %claim.counterparty,
                    amount = claim.amount,
                    "Claim rejected: {}",
                    e
                );
                Err(e)
            }
        }
    }

    async fn on_connection_handshake(
        &self,
        counterparty: &CounterpartyId,
        requested_address: &str,
        requested_tag: Option<&str>,
    ) -> Result<Destination> {
        let tag = requested_tag
            .map(|t| DestinationTag::parse(t).map(|t| u64::from(t.get())))
            .transpose()?;

        let destination = self
            .accounts
            .bind_address(counterparty, requested_address, tag)
            .await
            .map_err(|e| {
                warn!(
                    counterparty = %counterparty,
                    address = requested_address,
                    "Handshake rejected: {}",
                    e
                );
                e
            })?;

        info!(counterparty = %counterparty, destination = %destination, "Handshake accepted");
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger_client::SimulatedLedger;
    use crate::scheduler::Decision;

    const SOURCE: &str = "rHQfnr3rS7EC7P9YdYm7zcMXtk9u48TCyB";
    const DEST: &str = "rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY";

    fn config() -> Config {
        let mut config = Config::default();
        config.ledger.source_address = SOURCE.to_string();
        config.ledger.secret = "shmKxWVcvBDJwgCdxJUd2gb4tpwVc".to_string();
        config.settlement.threshold_drops = 1_000;
        config
    }

    fn claim(counterparty: &str, amount: u64, preimage: &[u8]) -> InboundClaim {
        InboundClaim {
            counterparty: CounterpartyId::new(counterparty),
            amount,
            execution_condition: gate::condition_for(preimage).to_vec(),
            fulfillment: preimage.to_vec(),
            destination: format!("g.settle.{}", counterparty),
        }
    }

    fn engine(ledger: Arc<SimulatedLedger>) -> SettlementEngine {
        SettlementEngine::with_store(&config(), CachedStore::in_memory(), ledger).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut bad = config();
        bad.ledger.secret.clear();
        let result = SettlementEngine::with_store(
            &bad,
            CachedStore::in_memory(),
            Arc::new(SimulatedLedger::new()),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_start_fails_without_ledger() {
        let ledger = Arc::new(SimulatedLedger::new());
        ledger.refuse_connections();
        let engine = engine(ledger);
        assert!(matches!(engine.start().await, Err(Error::LedgerClient(_))));
    }

    #[tokio::test]
    async fn test_unbound_counterparty_rejected() {
        let engine = engine(Arc::new(SimulatedLedger::new()));
        engine.start().await.unwrap();

        let err = engine.on_inbound_claim(claim("alice", 10, b"x")).await.unwrap_err();
        assert!(matches!(err, Error::AddressNotBound(_)));
        assert_eq!(engine.metrics().claims_rejected.get(), 1);
    }

    #[tokio::test]
    async fn test_claim_credited_below_threshold() {
        let engine = engine(Arc::new(SimulatedLedger::new()));
        engine.start().await.unwrap();
        let alice = CounterpartyId::new("alice");
        engine.on_connection_handshake(&alice, DEST, Some("5")).await.unwrap();

        let ack = engine.on_inbound_claim(claim("alice", 400, b"preimage")).await.unwrap();
        assert_eq!(ack.balance, Drops::new(400));
        assert_eq!(ack.decision, Decision::Wait);
        assert_eq!(ack.destination.to_string(), format!("{}~5", DEST));
        assert_eq!(engine.metrics().credited_drops.get(), 400);
    }

    #[tokio::test]
    async fn test_handshake_rejects_out_of_range_tag() {
        let engine = engine(Arc::new(SimulatedLedger::new()));
        let alice = CounterpartyId::new("alice");

        let err = engine
            .on_connection_handshake(&alice, DEST, Some("4294967296"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Ledger(account_ledger::Error::InvalidDestinationTag(_))
        ));
        assert!(engine.accounts().account(&alice).await.unwrap().destination.is_none());
    }

    #[tokio::test]
    async fn test_outbound_send_is_receive_only() {
        let engine = engine(Arc::new(SimulatedLedger::new()));
        let err = engine
            .on_outbound_send(&CounterpartyId::new("alice"), 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ReceiveOnly));
    }
}
