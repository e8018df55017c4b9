//! Prometheus metrics for operational visibility.
//!
//! Only aggregate counts are exported; device tokens and payload content
//! never appear in label values.

use prometheus::{IntCounter, IntCounterVec, IntGauge, Opts, Registry};

/// All metrics for the gateway.
#[derive(Clone)]
pub struct Metrics {
    /// The Prometheus registry containing all metrics.
    pub registry: Registry,

    /// Total number of notifications accepted into the queue.
    pub notifications_enqueued_total: IntCounter,

    /// Total number of notifications skipped at intake, by reason.
    pub notifications_skipped_total: IntCounterVec,

    /// Total number of notifications handed to a platform dispatcher.
    pub push_dispatched_total: IntCounterVec,

    /// Current number of notifications waiting in the queue.
    pub queue_depth: IntGauge,
}

impl Metrics {
    /// Create a new metrics instance with all metrics registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let notifications_enqueued_total = IntCounter::with_opts(Opts::new(
            "pushgate_notifications_enqueued_total",
            "Total number of notifications accepted into the queue",
        ))?;
        registry.register(Box::new(notifications_enqueued_total.clone()))?;

        let notifications_skipped_total = IntCounterVec::new(
            Opts::new(
                "pushgate_notifications_skipped_total",
                "Total number of notifications skipped at intake",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(notifications_skipped_total.clone()))?;

        let push_dispatched_total = IntCounterVec::new(
            Opts::new(
                "pushgate_push_dispatched_total",
                "Total number of notifications handed to a platform dispatcher",
            ),
            &["platform"],
        )?;
        registry.register(Box::new(push_dispatched_total.clone()))?;

        let queue_depth = IntGauge::with_opts(Opts::new(
            "pushgate_queue_depth",
            "Current number of notifications waiting in the queue",
        ))?;
        registry.register(Box::new(queue_depth.clone()))?;

        Ok(Self {
            registry,
            notifications_enqueued_total,
            notifications_skipped_total,
            push_dispatched_total,
            queue_depth,
        })
    }

    /// Record a notification accepted into the queue.
    pub fn record_enqueued(&self) {
        self.notifications_enqueued_total.inc();
    }

    /// Record a notification skipped at intake.
    pub fn record_skipped(&self, reason: &str) {
        self.notifications_skipped_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record a notification handed to a platform dispatcher.
    pub fn record_dispatched(&self, platform: &str) {
        self.push_dispatched_total
            .with_label_values(&[platform])
            .inc();
    }

    /// Update the queue depth gauge.
    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_depth.set(depth as i64);
    }

    /// Gather all metrics for export.
    pub fn gather(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        // nothing recorded yet, but the registry is live
        metrics.record_enqueued();
        assert!(!metrics.gather().is_empty());
    }

    #[test]
    fn test_intake_metrics() {
        let metrics = Metrics::new().unwrap();

        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_skipped("unknown_app");
        metrics.record_skipped("platform_disabled");
        metrics.set_queue_depth(42);

        assert_eq!(metrics.notifications_enqueued_total.get(), 2);
        assert_eq!(metrics.queue_depth.get(), 42);
        assert_eq!(
            metrics
                .notifications_skipped_total
                .with_label_values(&["unknown_app"])
                .get(),
            1
        );
    }

    #[test]
    fn test_dispatch_metrics() {
        let metrics = Metrics::new().unwrap();

        metrics.record_dispatched("ios");
        metrics.record_dispatched("ios");
        metrics.record_dispatched("android");

        assert_eq!(
            metrics
                .push_dispatched_total
                .with_label_values(&["ios"])
                .get(),
            2
        );
        assert_eq!(
            metrics
                .push_dispatched_total
                .with_label_values(&["android"])
                .get(),
            1
        );
    }
}
