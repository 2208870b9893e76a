//! Metrics collection for observability
//!
//! Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_transactions_accepted_total` - Transactions queued for sealing
//! - `ledger_transactions_rejected_total{rule}` - Rejections by rule
//! - `ledger_blocks_sealed_total` - Blocks appended after genesis
//! - `ledger_seal_duration_seconds` - Histogram of sealing latencies
//! - `ledger_chain_height` - Current number of blocks
//! - `ledger_pending_transactions` - Transactions awaiting sealing
//!
//! Each [`Metrics`] owns its registry so several ledgers can run in one
//! process.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;
use std::time::Duration;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Transactions accepted
    pub transactions_accepted: IntCounter,

    /// Transactions rejected, labelled by rule
    pub transactions_rejected: IntCounterVec,

    /// Blocks sealed
    pub blocks_sealed: IntCounter,

    /// Seal duration histogram
    pub seal_duration: Histogram,

    /// Chain height
    pub chain_height: IntGauge,

    /// Pending transactions
    pub pending_transactions: IntGauge,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("transactions_accepted", &self.transactions_accepted.get())
            .field("blocks_sealed", &self.blocks_sealed.get())
            .field("chain_height", &self.chain_height.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_accepted = IntCounter::new(
            "ledger_transactions_accepted_total",
            "Transactions accepted for sealing",
        )?;
        registry.register(Box::new(transactions_accepted.clone()))?;

        let transactions_rejected = IntCounterVec::new(
            Opts::new(
                "ledger_transactions_rejected_total",
                "Transactions rejected by business rules",
            ),
            &["rule"],
        )?;
        registry.register(Box::new(transactions_rejected.clone()))?;

        let blocks_sealed = IntCounter::new("ledger_blocks_sealed_total", "Blocks sealed")?;
        registry.register(Box::new(blocks_sealed.clone()))?;

        let seal_duration = Histogram::with_opts(
            HistogramOpts::new("ledger_seal_duration_seconds", "Histogram of sealing latencies")
                .buckets(vec![0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0, 5.0, 30.0]),
        )?;
        registry.register(Box::new(seal_duration.clone()))?;

        let chain_height = IntGauge::new("ledger_chain_height", "Number of blocks in the chain")?;
        registry.register(Box::new(chain_height.clone()))?;

        let pending_transactions =
            IntGauge::new("ledger_pending_transactions", "Transactions awaiting sealing")?;
        registry.register(Box::new(pending_transactions.clone()))?;

        Ok(Self {
            transactions_accepted,
            transactions_rejected,
            blocks_sealed,
            seal_duration,
            chain_height,
            pending_transactions,
            registry,
        })
    }

    /// Record an accepted transaction
    pub fn record_accepted(&self, pending: usize) {
        self.transactions_accepted.inc();
        self.pending_transactions.set(pending as i64);
    }

    /// Record a rejection
    pub fn record_rejected(&self, rule: &str) {
        self.transactions_rejected.with_label_values(&[rule]).inc();
    }

    /// Record a sealed block
    pub fn record_sealed(&self, duration: Duration, chain_height: usize) {
        self.blocks_sealed.inc();
        self.seal_duration.observe(duration.as_secs_f64());
        self.chain_height.set(chain_height as i64);
        self.pending_transactions.set(0);
    }

    /// Set gauges from a restored or freshly opened ledger
    pub fn observe_chain(&self, chain_height: usize, pending: usize) {
        self.chain_height.set(chain_height as i64);
        self.pending_transactions.set(pending as i64);
    }

    /// Prometheus text exposition of all metrics
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
