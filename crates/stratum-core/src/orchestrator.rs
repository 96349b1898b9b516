//! Call orchestration: node selection, classification and failover
//!
//! One logical call moves through these steps until it succeeds or fails:
//!
//! 1. select a node of the current datacenter
//! 2. run the retry executor against it and classify the response
//! 3. on a 503 (or exhausted retries, if configured) exclude the node and
//!    go back to 1
//! 4. once the datacenter has no node left, switch datacenter and go to 1
//!
//! Datacenter switches are bounded per call, so a deployment where every
//! node is down ends in `AllResourcesUnavailable` instead of spinning.

use std::sync::Arc;

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::classifier::classify;
use crate::error::CallError;
use crate::event::{CallEvent, CallEventKind};
use crate::executor::RetryExecutor;
use crate::observer::ObserverBus;
use crate::policy::{OrchestratorConfig, RetryPolicy};
use crate::topology::{LoadBalancedResource, Topology};
use crate::transport::{CallRequest, Transport};

/// Successful result of one logical call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallResponse {
    pub status: u16,
    pub body: Bytes,
    /// Node that served the call
    pub node: String,
    pub datacenter: String,
}

impl CallResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

struct Completed {
    response: Option<CallResponse>,
    node: String,
    datacenter: String,
}

/// Per-call bookkeeping shared by the failover steps.
struct CallState<'a> {
    call_id: &'a str,
    operation: String,
    started: Instant,
    datacenter_failovers: usize,
    last_cause: Option<CallError>,
    /// Datacenter of the node most recently handed to the executor
    last_datacenter: Option<String>,
}

impl CallState<'_> {
    fn event(&self, kind: CallEventKind, datacenter: &str) -> CallEvent {
        CallEvent::new(kind, self.call_id, self.operation.as_str(), datacenter)
            .with_elapsed(self.started.elapsed())
    }
}

/// Drives logical calls over a shared [`Topology`] through one transport.
pub struct CallOrchestrator<T: Transport> {
    topology: Arc<Topology>,
    transport: Arc<T>,
    executor: RetryExecutor,
    observers: Arc<ObserverBus>,
    config: OrchestratorConfig,
}

impl<T: Transport> CallOrchestrator<T> {
    pub fn new(
        topology: Arc<Topology>,
        transport: Arc<T>,
        policy: RetryPolicy,
        config: OrchestratorConfig,
        observers: Arc<ObserverBus>,
    ) -> Self {
        Self {
            topology,
            transport,
            executor: RetryExecutor::new(policy, observers.clone()),
            observers,
            config,
        }
    }

    pub fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    pub fn transport(&self) -> &Arc<T> {
        &self.transport
    }

    pub fn observers(&self) -> &Arc<ObserverBus> {
        &self.observers
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }

    /// Perform one logical call.
    ///
    /// `Ok(None)` is the soft outcome of a 404 on a non-mandatory request.
    /// Dropping the returned future abandons the call, including any
    /// in-flight attempt or backoff sleep.
    pub async fn call(&self, request: &CallRequest) -> Result<Option<CallResponse>, CallError> {
        let call_id = uuid::Uuid::new_v4().to_string();
        let mut state = CallState {
            call_id: &call_id,
            operation: format!("{} {}", request.method, request.target),
            started: Instant::now(),
            datacenter_failovers: 0,
            last_cause: None,
            last_datacenter: None,
        };

        let result = match (self.transport.validate(request), self.config.call_deadline) {
            (Err(e), _) => Err(e),
            (Ok(()), Some(deadline)) => {
                match tokio::time::timeout(deadline, self.run(request, &mut state)).await {
                    Ok(result) => result,
                    Err(_) => Err(CallError::DeadlineExceeded(deadline)),
                }
            }
            (Ok(()), None) => self.run(request, &mut state).await,
        };

        match &result {
            Ok(done) => {
                let mut event = state
                    .event(CallEventKind::CallSucceeded, &done.datacenter)
                    .with_node(done.node.as_str());
                if let Some(response) = &done.response {
                    event = event.with_status(response.status);
                }
                self.observers.publish(event);
            }
            Err(e) => {
                warn!(call_id = %call_id, operation = %state.operation, error = %e, "Call failed");
                let datacenter = match &state.last_datacenter {
                    Some(name) => name.clone(),
                    None => self.topology.current_datacenter().name().to_string(),
                };
                let mut event = state
                    .event(CallEventKind::CallFailed, &datacenter)
                    .with_error(e.class(), e.to_string());
                if let Some(status) = e.status() {
                    event = event.with_status(status);
                }
                self.observers.publish(event);
            }
        }

        result.map(|done| done.response)
    }

    async fn run(
        &self,
        request: &CallRequest,
        state: &mut CallState<'_>,
    ) -> Result<Completed, CallError> {
        loop {
            let observed = self.topology.current_index();
            let resource = match self.topology.lookup_node_in(observed) {
                Ok(resource) => resource,
                Err(exhausted) => {
                    self.failover_datacenter(observed, exhausted, state)?;
                    continue;
                }
            };
            state.last_datacenter = Some(resource.datacenter().name().to_string());

            let response = match self
                .executor
                .execute(self.transport.as_ref(), &resource, request, state.call_id)
                .await
            {
                Ok(response) => response,
                Err(cause @ CallError::RetriesExhausted { .. })
                    if self.config.failover_on_retries_exhausted =>
                {
                    self.failover_node(&resource, cause, state)?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            let node = resource.node().id();
            let outcome = classify(response.status, &response.body, request.mandatory);
            let node_unavailable = outcome.is_node_unavailable();
            match outcome.into_result(node) {
                Ok(found) => {
                    return Ok(Completed {
                        response: found.map(|(status, body)| CallResponse {
                            status,
                            body,
                            node: node.to_string(),
                            datacenter: resource.datacenter().name().to_string(),
                        }),
                        node: node.to_string(),
                        datacenter: resource.datacenter().name().to_string(),
                    });
                }
                Err(cause) if node_unavailable => {
                    self.failover_node(&resource, cause, state)?;
                }
                Err(fatal) => return Err(fatal),
            }
        }
    }

    /// Exclude the node and escalate to a datacenter switch when it was the
    /// last one available.
    fn failover_node(
        &self,
        resource: &LoadBalancedResource,
        cause: CallError,
        state: &mut CallState<'_>,
    ) -> Result<(), CallError> {
        let datacenter = resource.datacenter();
        self.observers.publish(
            state
                .event(CallEventKind::NodeFailover, datacenter.name())
                .with_node(resource.node().id())
                .with_error(cause.class(), cause.to_string()),
        );

        let result = self.topology.failover_node(resource, &cause);
        state.last_cause = Some(cause);
        match result {
            Ok(()) => Ok(()),
            Err(exhausted) => {
                self.failover_datacenter(resource.datacenter_index(), exhausted, state)
            }
        }
    }

    /// Move past the exhausted datacenter at `observed`, or give up once this
    /// call has used its datacenter failover budget.
    fn failover_datacenter(
        &self,
        observed: usize,
        exhausted: CallError,
        state: &mut CallState<'_>,
    ) -> Result<(), CallError> {
        let datacenters = self.topology.datacenters().len();
        let budget = (self.config.max_datacenter_passes.max(1) as usize).saturating_mul(datacenters);

        if state.last_cause.is_none() {
            state.last_cause = Some(exhausted);
        }

        if state.datacenter_failovers >= budget {
            warn!(
                call_id = %state.call_id,
                datacenters,
                failovers = state.datacenter_failovers,
                "Every datacenter exhausted"
            );
            return Err(CallError::AllResourcesUnavailable {
                datacenters,
                last_cause: state.last_cause.take().map(Box::new),
            });
        }
        state.datacenter_failovers += 1;

        let from = self.topology.datacenters()[observed % datacenters].name().to_string();
        let next = self.topology.failover_datacenter_from(observed);
        debug!(call_id = %state.call_id, from = %from, to = %next.name(), "Datacenter failover");
        self.observers
            .publish(state.event(CallEventKind::DatacenterFailover, next.name()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datacenter::Datacenter;
    use crate::error::TransportError;
    use crate::node::Node;
    use crate::token::StaticTokenProvider;
    use crate::transport::{AttemptContext, RawResponse};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::time::Duration;

    /// Answers every attempt on a node with that node's fixed status, or a
    /// transport error when the node has no entry.
    struct FixedTransport {
        statuses: HashMap<&'static str, u16>,
        seen: Mutex<Vec<(String, String)>>,
    }

    impl FixedTransport {
        fn new(statuses: &[(&'static str, u16)]) -> Self {
            Self {
                statuses: statuses.iter().copied().collect(),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen_nodes(&self) -> Vec<String> {
            self.seen.lock().iter().map(|(n, _)| n.clone()).collect()
        }
    }

    #[async_trait]
    impl Transport for FixedTransport {
        async fn send(
            &self,
            node: &Node,
            _request: &CallRequest,
            context: &AttemptContext,
        ) -> Result<RawResponse, TransportError> {
            self.seen
                .lock()
                .push((node.id().to_string(), context.token.clone()));
            match self.statuses.get(node.id()) {
                Some(status) => Ok(RawResponse::new(*status, format!("from {}", node.id()))),
                None => Err(TransportError::Connect("refused".to_string())),
            }
        }
    }

    fn datacenter(name: &str, ids: &[&str]) -> Datacenter {
        let nodes = ids
            .iter()
            .map(|id| Node::parse(*id, &format!("http://{}.example:8181", id), None).unwrap())
            .collect();
        Datacenter::new(
            name,
            nodes,
            Arc::new(StaticTokenProvider::new(format!("token-{}", name))),
        )
    }

    fn orchestrator(
        topology: Topology,
        transport: FixedTransport,
        config: OrchestratorConfig,
    ) -> CallOrchestrator<FixedTransport> {
        CallOrchestrator::new(
            Arc::new(topology),
            Arc::new(transport),
            RetryPolicy::new(2, Duration::from_millis(10), 2.0),
            config,
            Arc::new(ObserverBus::new()),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_status_is_not_failed_over() {
        let topology = Topology::builder()
            .datacenter(datacenter("dc1", &["a", "b"]))
            .build()
            .unwrap();
        let orchestrator = orchestrator(
            topology,
            FixedTransport::new(&[("a", 409), ("b", 200)]),
            OrchestratorConfig::default(),
        );

        let err = orchestrator.call(&CallRequest::get("/x")).await.unwrap_err();
        assert!(matches!(err, CallError::Conflict { .. }));
        assert_eq!(err.body(), Some("from a"));
        assert_eq!(orchestrator.transport().seen_nodes(), vec!["a"]);
        assert!(orchestrator.topology().find_node("a").unwrap().1.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_not_found() {
        let topology = Topology::builder()
            .datacenter(datacenter("dc1", &["a"]))
            .build()
            .unwrap();
        let orchestrator = orchestrator(
            topology,
            FixedTransport::new(&[("a", 404)]),
            OrchestratorConfig::default(),
        );

        let result = orchestrator
            .call(&CallRequest::get("/x").mandatory(false))
            .await
            .unwrap();
        assert!(result.is_none());

        let err = orchestrator.call(&CallRequest::get("/x")).await.unwrap_err();
        assert!(matches!(err, CallError::NotFound { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_fails_over_by_default() {
        let topology = Topology::builder()
            .datacenter(datacenter("dc1", &["a", "b"]))
            .build()
            .unwrap();
        let orchestrator = orchestrator(
            topology,
            FixedTransport::new(&[("b", 200)]),
            OrchestratorConfig::default(),
        );

        let response = orchestrator.call(&CallRequest::get("/x")).await.unwrap().unwrap();
        assert_eq!(response.node, "b");
        assert_eq!(orchestrator.transport().seen_nodes(), vec!["a", "a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_is_fatal_when_configured() {
        let topology = Topology::builder()
            .datacenter(datacenter("dc1", &["a", "b"]))
            .build()
            .unwrap();
        let config = OrchestratorConfig {
            failover_on_retries_exhausted: false,
            ..Default::default()
        };
        let orchestrator = orchestrator(topology, FixedTransport::new(&[("b", 200)]), config);

        let err = orchestrator.call(&CallRequest::get("/x")).await.unwrap_err();
        assert!(matches!(err, CallError::RetriesExhausted { attempts: 2, .. }));
        assert!(orchestrator.topology().find_node("a").unwrap().1.is_available());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_allows_extra_passes() {
        let topology = Topology::builder()
            .datacenter(datacenter("dc1", &["a"]))
            .datacenter(datacenter("dc2", &["b"]))
            .build()
            .unwrap();
        let config = OrchestratorConfig {
            max_datacenter_passes: 2,
            ..Default::default()
        };
        let orchestrator = orchestrator(
            topology,
            FixedTransport::new(&[("a", 503), ("b", 503)]),
            config,
        );

        let err = orchestrator.call(&CallRequest::get("/x")).await.unwrap_err();
        assert!(err.is_exhaustion());
        // nodes stay down, so further passes only re-check the datacenters
        assert_eq!(orchestrator.transport().seen_nodes(), vec!["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_reports_serving_node() {
        let topology = Topology::builder()
            .datacenter(datacenter("dc1", &["a"]))
            .build()
            .unwrap();
        let orchestrator = orchestrator(
            topology,
            FixedTransport::new(&[("a", 200)]),
            OrchestratorConfig::default(),
        );

        let response = orchestrator.call(&CallRequest::get("/x")).await.unwrap().unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.text(), "from a");
        assert_eq!(response.datacenter, "dc1");
        assert_eq!(orchestrator.transport().seen.lock()[0].1, "token-dc1");
    }
}
