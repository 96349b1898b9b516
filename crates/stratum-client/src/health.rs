//! Proactive node health checking
//!
//! Off by default: liveness normally changes only when live calls fail. When
//! enabled, every node's health endpoint is probed on an interval. A node is
//! taken out of rotation after `failure_threshold` consecutive failed probes
//! and put back after the first successful one.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use stratum_core::policy::millis;
use stratum_core::{Node, Topology};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Health check configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    pub enabled: bool,
    #[serde(rename = "interval_ms", with = "millis")]
    pub interval: Duration,
    #[serde(rename = "timeout_ms", with = "millis")]
    pub timeout: Duration,
    /// Consecutive failed probes before a node is marked unavailable
    pub failure_threshold: u32,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(10),
            timeout: Duration::from_millis(2000),
            failure_threshold: 3,
        }
    }
}

/// Checks whether one node is alive.
#[async_trait]
pub trait HealthProbe: Send + Sync + 'static {
    async fn probe(&self, node: &Node) -> anyhow::Result<()>;
}

/// Probes `GET <health endpoint>`; only status 200 counts as alive.
pub struct HttpHealthProbe {
    client: Client,
}

impl HttpHealthProbe {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self, node: &Node) -> anyhow::Result<()> {
        let response = self
            .client
            .get(node.health_endpoint().clone())
            .send()
            .await?;
        if response.status() != StatusCode::OK {
            anyhow::bail!("health check returned status {}", response.status());
        }
        Ok(())
    }
}

/// Outcome of one round of probes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub checked: usize,
    pub healthy: usize,
    /// Nodes put back into rotation by this round
    pub restored: Vec<String>,
    /// Nodes taken out of rotation by this round
    pub removed: Vec<String>,
}

/// Periodically probes every node of a topology.
pub struct HealthChecker {
    topology: Arc<Topology>,
    probe: Arc<dyn HealthProbe>,
    config: HealthCheckConfig,
    failures: DashMap<String, u32>,
}

impl HealthChecker {
    pub fn new(topology: Arc<Topology>, probe: Arc<dyn HealthProbe>, config: HealthCheckConfig) -> Self {
        Self {
            topology,
            probe,
            config,
            failures: DashMap::new(),
        }
    }

    /// Start the probe loop; abort the returned handle to stop it.
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_ms = self.config.interval.as_millis() as u64,
                "Health checker started"
            );

            loop {
                interval.tick().await;
                let report = self.check_all().await;
                debug!(
                    checked = report.checked,
                    healthy = report.healthy,
                    "Health check round completed"
                );
            }
        })
    }

    /// Probe every node once, in parallel, and apply the results.
    pub async fn check_all(&self) -> HealthReport {
        let nodes: Vec<Arc<Node>> = self
            .topology
            .datacenters()
            .iter()
            .flat_map(|dc| dc.nodes())
            .collect();

        let checks = nodes.into_iter().map(|node| {
            let probe = self.probe.clone();
            let timeout = self.config.timeout;
            async move {
                let result = match tokio::time::timeout(timeout, probe.probe(&node)).await {
                    Ok(result) => result,
                    Err(_) => Err(anyhow::anyhow!("health check timed out after {:?}", timeout)),
                };
                (node, result)
            }
        });
        let results = futures::future::join_all(checks).await;

        let mut report = HealthReport {
            checked: results.len(),
            ..Default::default()
        };
        for (node, result) in results {
            match result {
                Ok(()) => {
                    report.healthy += 1;
                    self.failures.remove(node.id());
                    if !node.is_available() && self.set_available(&node, true) {
                        info!(node = %node.id(), "Node restored by health check");
                        report.restored.push(node.id().to_string());
                    }
                }
                Err(e) => {
                    let failures = {
                        let mut count = self.failures.entry(node.id().to_string()).or_insert(0);
                        *count += 1;
                        *count
                    };
                    debug!(node = %node.id(), failures, error = %e, "Health check failed");
                    if failures >= self.config.failure_threshold.max(1)
                        && node.is_available()
                        && self.set_available(&node, false)
                    {
                        warn!(node = %node.id(), failures, error = %e, "Node removed by health check");
                        report.removed.push(node.id().to_string());
                    }
                }
            }
        }
        report
    }

    fn set_available(&self, node: &Node, available: bool) -> bool {
        self.topology
            .set_node_availability(node.id(), available)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use stratum_core::{Datacenter, StaticTokenProvider};

    /// Nodes listed in `down` fail their probe.
    #[derive(Default)]
    struct FakeProbe {
        down: Mutex<HashSet<String>>,
    }

    #[async_trait]
    impl HealthProbe for FakeProbe {
        async fn probe(&self, node: &Node) -> anyhow::Result<()> {
            if self.down.lock().contains(node.id()) {
                anyhow::bail!("down");
            }
            Ok(())
        }
    }

    fn topology() -> Arc<Topology> {
        let nodes = ["a", "b"]
            .iter()
            .map(|id| Node::parse(*id, &format!("http://{}.example:8181", id), None).unwrap())
            .collect();
        Arc::new(
            Topology::builder()
                .datacenter(Datacenter::new("dc1", nodes, Arc::new(StaticTokenProvider::none())))
                .build()
                .unwrap(),
        )
    }

    #[tokio::test]
    async fn test_threshold_then_restore() {
        let topology = topology();
        let probe = Arc::new(FakeProbe::default());
        probe.down.lock().insert("a".to_string());
        let config = HealthCheckConfig {
            failure_threshold: 2,
            ..Default::default()
        };
        let checker = HealthChecker::new(topology.clone(), probe.clone(), config);

        let report = checker.check_all().await;
        assert_eq!(report.checked, 2);
        assert_eq!(report.healthy, 1);
        assert!(report.removed.is_empty());
        assert!(topology.find_node("a").unwrap().1.is_available());

        let report = checker.check_all().await;
        assert_eq!(report.removed, vec!["a".to_string()]);
        assert!(!topology.find_node("a").unwrap().1.is_available());

        probe.down.lock().clear();
        let report = checker.check_all().await;
        assert_eq!(report.restored, vec!["a".to_string()]);
        assert!(topology.find_node("a").unwrap().1.is_available());
    }

    #[tokio::test]
    async fn test_restores_node_failed_by_live_traffic() {
        let topology = topology();
        topology.set_node_availability("b", false).unwrap();
        let checker = HealthChecker::new(
            topology.clone(),
            Arc::new(FakeProbe::default()),
            HealthCheckConfig::default(),
        );

        let report = checker.check_all().await;
        assert_eq!(report.restored, vec!["b".to_string()]);
        assert_eq!(topology.snapshot().datacenters[0].available_nodes, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_probe_times_out() {
        struct HangingProbe;

        #[async_trait]
        impl HealthProbe for HangingProbe {
            async fn probe(&self, _node: &Node) -> anyhow::Result<()> {
                std::future::pending().await
            }
        }

        let topology = topology();
        let config = HealthCheckConfig {
            failure_threshold: 1,
            ..Default::default()
        };
        let checker = HealthChecker::new(topology.clone(), Arc::new(HangingProbe), config);

        let report = checker.check_all().await;
        assert_eq!(report.healthy, 0);
        assert_eq!(report.removed.len(), 2);
        assert!(topology.lookup_node().is_err());
    }

    #[test]
    fn test_config_defaults() {
        let config: HealthCheckConfig = serde_json::from_str(r#"{"enabled":true,"interval_ms":500}"#).unwrap();
        assert!(config.enabled);
        assert_eq!(config.interval, Duration::from_millis(500));
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert_eq!(config.failure_threshold, 3);
    }
}
