//! Prometheus metrics fed from the call observer bus
//!
//! Provides:
//! - Call latency (histogram)
//! - Successful and failed calls (counters)
//! - Failed attempts per node (counter)
//! - Node and datacenter failovers (counters)

use async_trait::async_trait;
use prometheus::{
    CounterVec, HistogramVec, Registry, TextEncoder, register_counter_vec_with_registry,
    register_histogram_vec_with_registry,
};
use stratum_core::{CallEvent, CallEventKind, CallListener};

/// Observer that turns call events into Prometheus metrics.
///
/// Metrics live in a private registry so several clients in one process do
/// not collide; scrape them with [`MetricsListener::gather`].
pub struct MetricsListener {
    registry: Registry,
    call_latency: HistogramVec,
    success_calls: CounterVec,
    failed_calls: CounterVec,
    failed_attempts: CounterVec,
    node_failovers: CounterVec,
    datacenter_failovers: CounterVec,
}

impl MetricsListener {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let call_latency = register_histogram_vec_with_registry!(
            "stratum_call_latency_seconds",
            "Logical call latency in seconds, failovers included",
            &["method", "outcome"],
            registry
        )?;
        let success_calls = register_counter_vec_with_registry!(
            "stratum_success_calls_total",
            "Total number of successful calls",
            &["method", "datacenter"],
            registry
        )?;
        let failed_calls = register_counter_vec_with_registry!(
            "stratum_failed_calls_total",
            "Total number of failed calls",
            &["method", "error_type"],
            registry
        )?;
        let failed_attempts = register_counter_vec_with_registry!(
            "stratum_failed_attempts_total",
            "Total number of failed attempts",
            &["node", "error_type"],
            registry
        )?;
        let node_failovers = register_counter_vec_with_registry!(
            "stratum_node_failovers_total",
            "Total number of nodes taken out of rotation by failed calls",
            &["datacenter", "node"],
            registry
        )?;
        let datacenter_failovers = register_counter_vec_with_registry!(
            "stratum_datacenter_failovers_total",
            "Total number of datacenter switches, labelled by the datacenter left",
            &["datacenter"],
            registry
        )?;

        Ok(Self {
            registry,
            call_latency,
            success_calls,
            failed_calls,
            failed_attempts,
            node_failovers,
            datacenter_failovers,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Metrics in Prometheus text format
    pub fn gather(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new().encode_to_string(&self.registry.gather())
    }

    pub fn record(&self, event: &CallEvent) {
        // operation is "<METHOD> <target>"; targets are unbounded
        let method = event.operation.split(' ').next().unwrap_or_default();
        let error_type = event.error.as_ref().map(|e| e.class).unwrap_or("unknown");

        if event.kind.is_terminal() {
            let outcome = if event.is_failure() { "failure" } else { "success" };
            self.call_latency
                .with_label_values(&[method, outcome])
                .observe(event.elapsed.as_secs_f64());
        }

        match event.kind {
            CallEventKind::CallSucceeded => {
                self.success_calls
                    .with_label_values(&[method, event.datacenter.as_str()])
                    .inc();
            }
            CallEventKind::CallFailed => {
                self.failed_calls.with_label_values(&[method, error_type]).inc();
            }
            CallEventKind::AttemptFailed => {
                let node = event.node.as_deref().unwrap_or_default();
                self.failed_attempts.with_label_values(&[node, error_type]).inc();
            }
            CallEventKind::NodeFailover => {
                let node = event.node.as_deref().unwrap_or_default();
                self.node_failovers
                    .with_label_values(&[event.datacenter.as_str(), node])
                    .inc();
            }
            CallEventKind::DatacenterFailover => {
                self.datacenter_failovers
                    .with_label_values(&[event.datacenter.as_str()])
                    .inc();
            }
            _ => {}
        }
    }
}

#[async_trait]
impl CallListener for MetricsListener {
    async fn on_event(&self, event: &CallEvent) -> anyhow::Result<()> {
        self.record(event);
        Ok(())
    }
}
