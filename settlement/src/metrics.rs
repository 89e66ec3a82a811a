//! Metrics collection for observability
//!
//! Prometheus metrics for the settlement engine, registered in a private
//! registry so several engines can share a process (tests).
//!
//! # Metrics
//!
//! - `settlement_claims_total` - Claims accepted and credited
//! - `settlement_claims_rejected_total` - Claims refused before credit
//! - `settlement_credited_drops_total` - Drops credited across all accounts
//! - `settlement_submitted_total` - Settlement transactions submitted
//! - `settlement_failed_total` - Settlements that failed or timed out
//! - `settlement_pending_destinations` - Destinations with a deferred settlement
//! - `settlement_in_flight` - Settlements awaiting validation

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone, Debug)]
pub struct Metrics {
    /// Claims credited
    pub claims_total: IntCounter,

    /// Claims rejected
    pub claims_rejected: IntCounter,

    /// Drops credited
    pub credited_drops: IntCounter,

    /// Settlements submitted
    pub settlements_submitted: IntCounter,

    /// Settlements failed
    pub settlements_failed: IntCounter,

    /// Destinations with a deferred settlement
    pub pending_destinations: IntGauge,

    /// Settlements in flight
    pub in_flight: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let claims_total = IntCounter::new("settlement_claims_total", "Claims accepted and credited")?;
        registry.register(Box::new(claims_total.clone()))?;

        let claims_rejected = IntCounter::new(
            "settlement_claims_rejected_total",
            "Claims refused before credit",
        )?;
        registry.register(Box::new(claims_rejected.clone()))?;

        let credited_drops = IntCounter::new(
            "settlement_credited_drops_total",
            "Drops credited across all accounts",
        )?;
        registry.register(Box::new(credited_drops.clone()))?;

        let settlements_submitted = IntCounter::new(
            "settlement_submitted_total",
            "Settlement transactions submitted",
        )?;
        registry.register(Box::new(settlements_submitted.clone()))?;

        let settlements_failed = IntCounter::new(
            "settlement_failed_total",
            "Settlements that failed or timed out",
        )?;
        registry.register(Box::new(settlements_failed.clone()))?;

        let pending_destinations = IntGauge::new(
            "settlement_pending_destinations",
            "Destinations with a deferred settlement",
        )?;
        registry.register(Box::new(pending_destinations.clone()))?;

        let in_flight = IntGauge::new("settlement_in_flight", "Settlements awaiting validation")?;
        registry.register(Box::new(in_flight.clone()))?;

        Ok(Self {
            claims_total,
            claims_rejected,
            credited_drops,
            settlements_submitted,
            settlements_failed,
            pending_destinations,
            in_flight,
            registry,
        })
    }

    /// Record an accepted claim
    pub fn record_claim(&self, drops: u64) {
        self.claims_total.inc();
        self.credited_drops.inc_by(drops);
    }

    /// Record a rejected claim
    pub fn record_rejection(&self) {
        self.claims_rejected.inc();
    }

    /// Record a settlement submission
    pub fn record_submission(&self) {
        self.settlements_submitted.inc();
        self.in_flight.inc();
    }

    /// Record a settlement outcome
    pub fn record_outcome(&self, success: bool) {
        self.in_flight.dec();
        if !success {
            self.settlements_failed.inc();
        }
    }

    /// Text exposition of every metric
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}
