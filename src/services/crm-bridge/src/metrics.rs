//! Prometheus metrics for the CRM Bridge Service
//!
//! Tracks webhook outcomes per category, outbound CRM calls per method and
//! webhook handling latency.

use crate::error::{BridgeError, BridgeResult};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Metrics collector shared through application state
#[derive(Clone)]
pub struct BridgeMetrics {
    registry: Arc<Registry>,
    webhook_requests: IntCounterVec,
    webhook_duration: HistogramVec,
    crm_calls: IntCounterVec,
}

impl BridgeMetrics {
    /// Create a new metrics collector with all series registered
    pub fn new(namespace: &str) -> BridgeResult<Self> {
        info!("Initializing bridge metrics");

        let registry = Registry::new();

        let webhook_requests = IntCounterVec::new(
            Opts::new(
                "webhook_requests_total",
                "Inbound webhook deliveries by category and outcome",
            )
            .namespace(namespace),
            &["category", "outcome"],
        )
        .map_err(|e| {
            BridgeError::internal(format!("Failed to create webhook_requests counter: {}", e))
        })?;

        let webhook_duration = HistogramVec::new(
            HistogramOpts::new(
                "webhook_duration_seconds",
                "Time spent handling an inbound webhook",
            )
            .namespace(namespace)
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["category"],
        )
        .map_err(|e| {
            BridgeError::internal(format!("Failed to create webhook_duration histogram: {}", e))
        })?;

        let crm_calls = IntCounterVec::new(
            Opts::new("crm_calls_total", "Outbound CRM API calls by method and outcome")
                .namespace(namespace),
            &["method", "outcome"],
        )
        .map_err(|e| BridgeError::internal(format!("Failed to create crm_calls counter: {}", e)))?;

        for collector in [
            Box::new(webhook_requests.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(webhook_duration.clone()),
            Box::new(crm_calls.clone()),
        ] {
            registry
                .register(collector)
                .map_err(|e| BridgeError::internal(format!("Failed to register metric: {}", e)))?;
        }

        Ok(Self {
            registry: Arc::new(registry),
            webhook_requests,
            webhook_duration,
            crm_calls,
        })
    }

    /// Record the terminal state of one webhook delivery
    pub fn record_webhook(&self, category: &str, outcome: &str, elapsed: Duration) {
        self.webhook_requests
            .with_label_values(&[category, outcome])
            .inc();
        self.webhook_duration
            .with_label_values(&[category])
            .observe(elapsed.as_secs_f64());
    }

    /// Record one outbound CRM call
    pub fn record_crm_call(&self, method: &str, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.crm_calls.with_label_values(&[method, outcome]).inc();
    }

    /// Render all series in the Prometheus text format
    pub fn render(&self) -> BridgeResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| BridgeError::internal(format!("Failed to encode metrics: {}", e)))?;
        String::from_utf8(buffer)
            .map_err(|e| BridgeError::internal(format!("Metrics are not UTF-8: {}", e)))
    }

    #[cfg(test)]
    pub(crate) fn webhook_count(&self, category: &str, outcome: &str) -> u64 {
        self.webhook_requests
            .with_label_values(&[category, outcome])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_render() {
        let metrics = BridgeMetrics::new("test_bridge").unwrap();
        metrics.record_webhook("CREATE_DEAL", "succeeded", Duration::from_millis(20));
        metrics.record_webhook("CREATE_DEAL", "succeeded", Duration::from_millis(40));
        metrics.record_crm_call("crm.deal.add", true);

        assert_eq!(metrics.webhook_count("CREATE_DEAL", "succeeded"), 2);

        let text = metrics.render().unwrap();
        assert!(text.contains("test_bridge_webhook_requests_total"));
        assert!(text.contains("test_bridge_crm_calls_total"));
        assert!(text.contains("method=\"crm.deal.add\""));
    }
}
