//! Metrics collection for the order engine
//!
//! # Metrics
//!
//! - `orders_created_total{payment_method}` - Orders created
//! - `order_transitions_total{to}` - Status transitions
//! - `order_rejections_total{reason}` - Rejected order actions
//! - `order_downloads_total` - Download records written
//! - `order_operation_duration_seconds{operation}` - Operation latency

use crate::types::{OrderStatus, PaymentMethod};
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry};

/// Metrics collector
#[derive(Clone)]
pub struct OrderMetrics {
    /// Orders created by payment method
    pub orders_created: IntCounterVec,

    /// Transitions by target status
    pub transitions_total: IntCounterVec,

    /// Rejections by reason
    pub rejections_total: IntCounterVec,

    /// Download records
    pub downloads_total: IntCounter,

    /// Operation latency
    pub operation_duration: HistogramVec,

    /// Prometheus registry
    pub registry: Registry,
}

impl std::fmt::Debug for OrderMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderMetrics").finish_non_exhaustive()
    }
}

impl OrderMetrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let orders_created = IntCounterVec::new(
            Opts::new("orders_created_total", "Orders created"),
            &["payment_method"],
        )?;
        registry.register(Box::new(orders_created.clone()))?;

        let transitions_total = IntCounterVec::new(
            Opts::new("order_transitions_total", "Order status transitions"),
            &["to"],
        )?;
        registry.register(Box::new(transitions_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("order_rejections_total", "Rejected order actions"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let downloads_total = IntCounter::new("order_downloads_total", "Download records written")?;
        registry.register(Box::new(downloads_total.clone()))?;

        let operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "order_operation_duration_seconds",
                "Histogram of order operation latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
            &["operation"],
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            orders_created,
            transitions_total,
            rejections_total,
            downloads_total,
            operation_duration,
            registry,
        })
    }

    /// Record a new order
    pub fn record_created(&self, method: PaymentMethod) {
        self.orders_created.with_label_values(&[method.as_str()]).inc();
    }

    /// Record a status transition
    pub fn record_transition(&self, to: OrderStatus) {
        self.transitions_total.with_label_values(&[to.as_str()]).inc();
    }

    /// Record a rejected action
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_counters() {
        let metrics = OrderMetrics::new().unwrap();
        metrics.record_created(PaymentMethod::Credits);
        metrics.record_transition(OrderStatus::Completed);
        metrics.record_transition(OrderStatus::Completed);

        assert_eq!(
            metrics.orders_created.with_label_values(&["credits"]).get(),
            1
        );
        assert_eq!(
            metrics.transitions_total.with_label_values(&["completed"]).get(),
            2
        );
        assert!(!metrics.registry().gather().is_empty());
    }
}
