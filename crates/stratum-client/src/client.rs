//! Stratum client facade
//!
//! Ties a [`ClientConfig`] to a transport: builds the topology and token
//! providers, owns the observer bus and runs logical calls through a
//! [`CallOrchestrator`].

use std::sync::Arc;

use reqwest::Client;
use serde::Serialize;
use stratum_core::{
    CallError, CallListener, CallOrchestrator, CallRequest, CallResponse, Method, ObserverBus,
    Topology, TopologySnapshot, Transport,
};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::health::{HealthCheckConfig, HealthChecker, HealthReport, HttpHealthProbe};
use crate::metrics::MetricsListener;
use crate::transport::{HttpTransport, RpcTransport};

pub const METRICS_LISTENER: &str = "metrics";

/// Client for a multi-datacenter Stratum deployment.
pub struct StratumClient<T: Transport> {
    orchestrator: CallOrchestrator<T>,
    health_check: HealthCheckConfig,
}

impl StratumClient<HttpTransport> {
    /// Client sending calls as HTTP requests.
    pub fn http(config: &ClientConfig) -> Result<Self> {
        let transport = HttpTransport::new(&config.retry, config.user_agent.clone())?;
        Self::with_transport(config, Arc::new(transport))
    }
}

impl StratumClient<RpcTransport> {
    /// Client sending calls as unary gRPC invocations.
    pub fn rpc(config: &ClientConfig) -> Result<Self> {
        let transport = RpcTransport::new(&config.retry, config.user_agent.clone());
        Self::with_transport(config, Arc::new(transport))
    }
}

impl<T: Transport> StratumClient<T> {
    pub fn with_transport(config: &ClientConfig, transport: Arc<T>) -> Result<Self> {
        let topology = Arc::new(config.build_topology()?);
        let observers = Arc::new(ObserverBus::new());
        let orchestrator = CallOrchestrator::new(
            topology.clone(),
            transport,
            config.retry.clone(),
            config.orchestrator.clone(),
            observers,
        );

        let snapshot = topology.snapshot();
        info!(
            datacenters = snapshot.datacenters.len(),
            current = %snapshot.current,
            "Stratum client created"
        );

        Ok(Self {
            orchestrator,
            health_check: config.health_check.clone(),
        })
    }

    /// Perform one logical call with node and datacenter failover.
    ///
    /// `Ok(None)` is returned for a 404 on a non-mandatory request.
    pub async fn execute(&self, request: &CallRequest) -> Result<Option<CallResponse>> {
        Ok(self.orchestrator.call(request).await?)
    }

    /// Fetch `target`; a missing resource is `Ok(None)`.
    pub async fn get(&self, target: &str) -> Result<Option<CallResponse>> {
        self.execute(&CallRequest::get(target).mandatory(false)).await
    }

    /// `POST` a JSON body to `target`. A 404 is an error here.
    pub async fn post_json<B: Serialize + ?Sized>(&self, target: &str, body: &B) -> Result<CallResponse> {
        let request = CallRequest::new(Method::Post, target)
            .with_json(body)
            .map_err(|e| ClientError::Other(e.into()))?
            .mandatory(true);
        self.execute(&request).await?.ok_or_else(|| {
            ClientError::Other(anyhow::anyhow!("mandatory call to {} returned no response", target))
        })
    }

    /// Credential of the current datacenter.
    pub async fn lookup_token(&self) -> Result<String> {
        self.topology()
            .lookup_token()
            .await
            .map_err(|e| ClientError::Call(CallError::Token(e)))
    }

    pub fn topology(&self) -> &Arc<Topology> {
        self.orchestrator.topology()
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        self.topology().snapshot()
    }

    pub fn observers(&self) -> &Arc<ObserverBus> {
        self.orchestrator.observers()
    }

    pub fn transport(&self) -> &Arc<T> {
        self.orchestrator.transport()
    }

    /// Register a call lifecycle listener, replacing any with the same name.
    pub fn add_listener<L: CallListener>(&self, name: &str, listener: L) {
        self.observers().register(name, listener);
    }

    pub fn remove_listener(&self, name: &str) -> bool {
        self.observers().unregister(name)
    }

    /// Attach a Prometheus listener to this client's events.
    pub fn enable_metrics(&self) -> Result<Arc<MetricsListener>> {
        let metrics = Arc::new(MetricsListener::new()?);
        self.observers()
            .register_shared(METRICS_LISTENER, metrics.clone());
        Ok(metrics)
    }

    /// Start background health probes if enabled in the configuration.
    ///
    /// Returns `None` when health checking is disabled; abort the handle to
    /// stop probing.
    pub fn spawn_health_checker(&self) -> Result<Option<JoinHandle<()>>> {
        if !self.health_check.enabled {
            return Ok(None);
        }
        Ok(Some(Arc::new(self.health_checker()?).spawn()))
    }

    /// Probe every node once and apply the results, whether or not
    /// background health checking is enabled.
    pub async fn check_health(&self) -> Result<HealthReport> {
        Ok(self.health_checker()?.check_all().await)
    }

    fn health_checker(&self) -> Result<HealthChecker> {
        let client = Client::builder()
            .connect_timeout(self.health_check.timeout)
            .timeout(self.health_check.timeout)
            .build()?;
        Ok(HealthChecker::new(
            self.topology().clone(),
            Arc::new(HttpHealthProbe::new(client)),
            self.health_check.clone(),
        ))
    }
}
