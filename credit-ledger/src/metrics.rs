//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//!
//! # Metrics
//!
//! - `ledger_postings_total{transaction_type}` - Committed ledger entries
//! - `ledger_credits_moved_total{direction}` - Credits earned / spent
//! - `ledger_rejections_total{reason}` - Rejected postings
//! - `ledger_operation_duration_seconds{operation}` - Operation latency

use crate::types::CreditTransaction;
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};

/// Metrics collector
#[derive(Clone)]
pub struct LedgerMetrics {
    /// Committed postings by type
    pub postings_total: IntCounterVec,

    /// Credits moved by direction
    pub credits_moved: IntCounterVec,

    /// Rejections by reason
    pub rejections_total: IntCounterVec,

    /// Operation latency
    pub operation_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Registry,
}

impl std::fmt::Debug for LedgerMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LedgerMetrics").finish_non_exhaustive()
    }
}

impl LedgerMetrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let postings_total = IntCounterVec::new(
            Opts::new("ledger_postings_total", "Committed ledger entries"),
            &["transaction_type"],
        )?;
        registry.register(Box::new(postings_total.clone()))?;

        let credits_moved = IntCounterVec::new(
            Opts::new("ledger_credits_moved_total", "Credits moved through the ledger"),
            &["direction"],
        )?;
        registry.register(Box::new(credits_moved.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("ledger_rejections_total", "Rejected ledger postings"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "ledger_operation_duration_seconds",
                "Histogram of ledger operation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            postings_total,
            credits_moved,
            rejections_total,
            operation_duration,
            registry,
        })
    }

    /// Record a committed posting
    pub fn record_posting(&self, tx: &CreditTransaction) {
        self.postings_total
            .with_label_values(&[tx.transaction_type.as_str()])
            .inc();
        let direction = if tx.amount >= 0 { "earned" } else { "spent" };
        self.credits_moved
            .with_label_values(&[direction])
            .inc_by(tx.amount.unsigned_abs());
    }

    /// Record a rejected posting
    pub fn record_rejection(&self, reason: &str) {
        self.rejections_total.with_label_values(&[reason]).inc();
    }

    /// Record operation duration
    pub fn observe_duration(&self, operation: &str, duration_seconds: f64) {
        self.operation_duration
            .with_label_values(&[operation])
            .observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
