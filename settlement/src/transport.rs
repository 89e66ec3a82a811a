//! Transport seam
//!
//! The engine does not own counterparty connections. A transport component
//! multiplexes them and calls into the engine through [`ClaimHandler`]; the
//! engine reports settlements back through the [`ConnectionRegistry`].

use crate::{scheduler::Decision, Error, Result};
use account_ledger::{CounterpartyId, Destination, Drops};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Conditional claim delivered by a counterparty
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundClaim {
    /// Connection the claim arrived on
    pub counterparty: CounterpartyId,
    /// Claimed amount in drops
    pub amount: u64,
    /// Hash-lock the fulfillment must open
    pub execution_condition: Vec<u8>,
    /// Preimage presented by the payer
    pub fulfillment: Vec<u8>,
    /// Protocol destination address of the claim
    pub destination: String,
}

/// Acknowledgement of an accepted claim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimAck {
    /// Account that was credited
    pub account: CounterpartyId,
    /// Where that account settles
    pub destination: Destination,
    /// Account balance after the claim
    pub balance: Drops,
    /// What the scheduler decided
    pub decision: Decision,
}

/// Capability the transport invokes on the settlement engine
#[async_trait]
pub trait ClaimHandler: Send + Sync {
    /// Verify and credit a claim; settlement runs detached from the reply
    async fn on_inbound_claim(&self, claim: InboundClaim) -> Result<ClaimAck>;

    /// Bind the settlement address requested in a connection handshake
    async fn on_connection_handshake(
        &self,
        counterparty: &CounterpartyId,
        requested_address: &str,
        requested_tag: Option<&str>,
    ) -> Result<Destination>;

    /// Counterparty-initiated value transfer; this endpoint only receives
    async fn on_outbound_send(&self, counterparty: &CounterpartyId, amount: u64) -> Result<()> {
        warn!(counterparty = %counterparty, amount, "Rejecting outbound send");
        Err(Error::ReceiveOnly)
    }
}

/// Settlement notice pushed to a connected counterparty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementNotice {
    /// Ledger transaction hash
    pub transaction_id: String,
    /// Settled destination
    pub destination: Destination,
    /// Amount paid
    pub amount: Drops,
}

#[derive(Debug)]
struct Connection {
    destination: Option<Destination>,
    outbox: mpsc::UnboundedSender<SettlementNotice>,
}

/// Connected counterparties and their outboxes
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: DashMap<CounterpartyId, Connection>,
}

impl ConnectionRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; the receiver yields notices for it
    pub fn on_connect(
        &self,
        counterparty: &CounterpartyId,
        destination: Option<Destination>,
    ) -> mpsc::UnboundedReceiver<SettlementNotice> {
        let (outbox, inbox) = mpsc::unbounded_channel();
        debug!(counterparty = %counterparty, "Counterparty connected");
        self.connections
            .insert(counterparty.clone(), Connection { destination, outbox });
        inbox
    }

    /// Drop a connection
    pub fn on_disconnect(&self, counterparty: &CounterpartyId) {
        if self.connections.remove(counterparty).is_some() {
            debug!(counterparty = %counterparty, "Counterparty disconnected");
        }
    }

    /// Whether a counterparty is connected
    pub fn is_connected(&self, counterparty: &CounterpartyId) -> bool {
        self.connections.contains_key(counterparty)
    }

    /// Number of live connections
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Whether nobody is connected
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Push a notice to one counterparty
    pub fn deliver(&self, counterparty: &CounterpartyId, notice: SettlementNotice) -> Result<()> {
        let sent = self
            .connections
            .get(counterparty)
            .map(|c| c.outbox.send(notice).is_ok());

        match sent {
            Some(true) => Ok(()),
            Some(false) => {
                // Receiver gone without a disconnect
                self.connections.remove(counterparty);
                Err(Error::TransportUnavailable(counterparty.to_string()))
            }
            None => Err(Error::TransportUnavailable(counterparty.to_string())),
        }
    }

    /// Push a notice to every connection settling to its destination; returns how many got it
    pub fn deliver_to_destination(&self, notice: &SettlementNotice) -> Result<usize> {
        let targets: Vec<CounterpartyId> = self
            .connections
            .iter()
            .filter(|c| c.destination.as_ref() == Some(&notice.destination))
            .map(|c| c.key().clone())
            .collect();

        let mut delivered = 0;
        for counterparty in targets {
            match self.deliver(&counterparty, notice.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(counterparty = %counterparty, "Settlement notice not delivered: {}", e),
            }
        }

        if delivered == 0 {
            return Err(Error::TransportUnavailable(notice.destination.to_string()));
        }
        Ok(delivered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notice(destination: &Destination) -> SettlementNotice {
        SettlementNotice {
            transaction_id: "AB".repeat(32),
            destination: destination.clone(),
            amount: Drops::new(1_000),
        }
    }

    #[tokio::test]
    async fn test_deliver_to_connected() {
        let registry = ConnectionRegistry::new();
        let alice = CounterpartyId::new("alice");
        let dest = Destination::parse("rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY").unwrap();

        let mut inbox = registry.on_connect(&alice, Some(dest.clone()));
        assert_eq!(registry.deliver_to_destination(&notice(&dest)).unwrap(), 1);
        assert_eq!(inbox.recv().await.unwrap(), notice(&dest));
    }

    #[test]
    fn test_missing_connection_is_unavailable() {
        let registry = ConnectionRegistry::new();
        let alice = CounterpartyId::new("alice");
        let dest = Destination::parse("rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY").unwrap();

        assert!(matches!(
            registry.deliver(&alice, notice(&dest)),
            Err(Error::TransportUnavailable(_))
        ));
        assert!(matches!(
            registry.deliver_to_destination(&notice(&dest)),
            Err(Error::TransportUnavailable(_))
        ));
    }

    #[test]
    fn test_dropped_receiver_evicted() {
        let registry = ConnectionRegistry::new();
        let alice = CounterpartyId::new("alice");
        let dest = Destination::parse("rPEPPER7kfTD9w2To4CQk6UCfuHM9c6GDY").unwrap();

        drop(registry.on_connect(&alice, Some(dest.clone())));
        assert!(registry.deliver(&alice, notice(&dest)).is_err());
        assert!(!registry.is_connected(&alice));

        let _inbox = registry.on_connect(&alice, None);
        registry.on_disconnect(&alice);
        assert!(registry.is_empty());
    }
}
