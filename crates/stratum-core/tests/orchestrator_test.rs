// Integration tests for CallOrchestrator
// Covers node failover, datacenter failover, backoff timing and call bounds

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use stratum_core::{
    AttemptContext, CallError, CallEvent, CallEventKind, CallOrchestrator, CallRequest, Datacenter,
    FnCallListener, Node, ObserverBus, OrchestratorConfig, RawResponse, RetryPolicy,
    StaticTokenProvider, Topology, Transport, TransportError,
};
use tokio::time::Instant;

/// Per-node scripted transport. A node replays its queue of results; once
/// the queue is empty it keeps answering with its fallback.
#[derive(Default)]
struct MockBackend {
    scripts: Mutex<HashMap<String, VecDeque<Result<RawResponse, TransportError>>>>,
    fallback: Mutex<HashMap<String, u16>>,
    log: Mutex<Vec<Attempt>>,
}

#[derive(Debug, Clone)]
struct Attempt {
    node: String,
    token: String,
    at: Instant,
}

impl MockBackend {
    fn answer(self, node: &str, status: u16) -> Self {
        self.fallback.lock().insert(node.to_string(), status);
        self
    }

    fn script(self, node: &str, results: Vec<Result<RawResponse, TransportError>>) -> Self {
        self.scripts.lock().insert(node.to_string(), results.into());
        self
    }

    fn nodes(&self) -> Vec<String> {
        self.log.lock().iter().map(|a| a.node.clone()).collect()
    }
}

#[async_trait]
impl Transport for MockBackend {
    async fn send(
        &self,
        node: &Node,
        _request: &CallRequest,
        context: &AttemptContext,
    ) -> Result<RawResponse, TransportError> {
        self.log.lock().push(Attempt {
            node: node.id().to_string(),
            token: context.token.clone(),
            at: Instant::now(),
        });

        if let Some(next) = self
            .scripts
            .lock()
            .get_mut(node.id())
            .and_then(|queue| queue.pop_front())
        {
            return next;
        }
        match self.fallback.lock().get(node.id()) {
            Some(status) => Ok(RawResponse::new(*status, format!("{}:{}", node.id(), status))),
            None => Err(TransportError::Connect(format!("{} refused", node.id()))),
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

fn build(
    topology: Topology,
    backend: MockBackend,
    policy: RetryPolicy,
    config: OrchestratorConfig,
) -> CallOrchestrator<MockBackend> {
    CallOrchestrator::new(
        Arc::new(topology),
        Arc::new(backend),
        policy,
        config,
        Arc::new(ObserverBus::new()),
    )
}

#[tokio::test(start_paused = true)]
async fn test_node_failover_within_datacenter() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a", "b", "c"]))
        .build()
        .unwrap();
    let backend = MockBackend::default()
        .answer("a", 503)
        .answer("b", 200)
        .answer("c", 200);
    let orchestrator = build(
        topology,
        backend,
        RetryPolicy::default(),
        OrchestratorConfig::default(),
    );

    let response = orchestrator
        .call(&CallRequest::get("/v1/items"))
        .await
        .unwrap()
        .unwrap();

    // A answered 503 once, then B served the same logical call
    assert_eq!(response.node, "b");
    assert_eq!(orchestrator.transport().nodes(), vec!["a", "b"]);

    // A stays excluded from later lookups
    for _ in 0..4 {
        let resource = orchestrator.topology().lookup_node().unwrap();
        assert_ne!(resource.node().id(), "a");
    }

    // until it is explicitly marked available again
    orchestrator.topology().mark_node_available("a").unwrap();
    let picks: Vec<String> = (0..3)
        .map(|_| orchestrator.topology().lookup_node().unwrap().node().id().to_string())
        .collect();
    assert!(picks.contains(&"a".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_datacenter_failover_switches_token() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a"]))
        .datacenter(datacenter("dc2", &["b"]))
        .local_datacenter("dc1")
        .build()
        .unwrap();
    let backend = MockBackend::default().answer("a", 503).answer("b", 200);
    let orchestrator = build(
        topology,
        backend,
        RetryPolicy::default(),
        OrchestratorConfig::default(),
    );

    let response = orchestrator
        .call(&CallRequest::post("/v1/items", "{}"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.node, "b");
    assert_eq!(response.datacenter, "dc2");
    assert_eq!(orchestrator.topology().current_datacenter().name(), "dc2");
    assert_eq!(orchestrator.topology().lookup_token().await.unwrap(), "token-dc2");

    let log = orchestrator.transport().log.lock().clone();
    assert_eq!(log.len(), 2);
    assert_eq!((log[0].node.as_str(), log[0].token.as_str()), ("a", "token-dc1"));
    assert_eq!((log[1].node.as_str(), log[1].token.as_str()), ("b", "token-dc2"));
}

#[tokio::test(start_paused = true)]
async fn test_retry_backoff_timing() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a"]))
        .build()
        .unwrap();
    let orchestrator = build(
        topology,
        MockBackend::default(),
        RetryPolicy::new(3, Duration::from_millis(100), 2.0),
        OrchestratorConfig {
            failover_on_retries_exhausted: false,
            ..Default::default()
        },
    );

    let started = Instant::now();
    let err = orchestrator
        .call(&CallRequest::get("/v1/items"))
        .await
        .unwrap_err();

    match err {
        CallError::RetriesExhausted {
            node,
            attempts,
            source,
        } => {
            assert_eq!(node, "a");
            assert_eq!(attempts, 3);
            assert_eq!(source, TransportError::Connect("a refused".to_string()));
        }
        other => panic!("unexpected error: {other}"),
    }

    let offsets: Vec<Duration> = orchestrator
        .transport()
        .log
        .lock()
        .iter()
        .map(|a| a.at.duration_since(started))
        .collect();
    assert_eq!(
        offsets,
        vec![
            Duration::ZERO,
            Duration::from_millis(100),
            Duration::from_millis(300)
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_transient_errors_recover_on_same_node() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a", "b"]))
        .build()
        .unwrap();
    let backend = MockBackend::default()
        .script(
            "a",
            vec![
                Err(TransportError::Timeout(Duration::from_secs(20))),
                Err(TransportError::Io("connection reset".to_string())),
            ],
        )
        .answer("a", 200)
        .answer("b", 200);
    let orchestrator = build(
        topology,
        backend,
        RetryPolicy::default(),
        OrchestratorConfig::default(),
    );

    let response = orchestrator
        .call(&CallRequest::get("/v1/items"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.node, "a");
    assert_eq!(orchestrator.transport().nodes(), vec!["a", "a", "a"]);
    assert!(orchestrator.topology().find_node("a").unwrap().1.is_available());
}

#[tokio::test(start_paused = true)]
async fn test_all_resources_unavailable() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a", "b"]))
        .datacenter(datacenter("dc2", &["c"]))
        .build()
        .unwrap();
    let backend = MockBackend::default()
        .answer("a", 503)
        .answer("b", 503)
        .answer("c", 503);
    let orchestrator = build(
        topology,
        backend,
        RetryPolicy::default(),
        OrchestratorConfig::default(),
    );

    let err = orchestrator
        .call(&CallRequest::get("/v1/items"))
        .await
        .unwrap_err();

    assert!(err.is_exhaustion());
    match &err {
        CallError::AllResourcesUnavailable {
            datacenters,
            last_cause,
        } => {
            assert_eq!(*datacenters, 2);
            let cause = last_cause.as_deref().unwrap();
            assert!(matches!(cause, CallError::ServiceUnavailable { node, .. } if node == "c"));
        }
        other => panic!("unexpected error: {other}"),
    }

    // every node was tried exactly once, and the loop stopped
    let mut tried = orchestrator.transport().nodes();
    tried.sort();
    assert_eq!(tried, vec!["a", "b", "c"]);

    let snapshot = orchestrator.topology().snapshot();
    assert!(snapshot.datacenters.iter().all(|dc| dc.available_nodes == 0));
}

#[tokio::test(start_paused = true)]
async fn test_call_failed_names_last_datacenter_tried() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a"]))
        .datacenter(datacenter("dc2", &["b"]))
        .build()
        .unwrap();
    let backend = MockBackend::default().answer("a", 503).answer("b", 503);

    let observers = Arc::new(ObserverBus::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    observers.register(
        "recorder",
        FnCallListener::new(move |e: &CallEvent| {
            if e.kind == CallEventKind::CallFailed {
                let _ = tx.send(e.clone());
            }
        }),
    );

    let orchestrator = CallOrchestrator::new(
        Arc::new(topology),
        Arc::new(backend),
        RetryPolicy::default(),
        OrchestratorConfig::default(),
        observers,
    );
    let err = orchestrator
        .call(&CallRequest::get("/v1/items"))
        .await
        .unwrap_err();
    assert!(err.is_exhaustion());

    // the second switch wrapped the topology back to dc1, but b in dc2 was
    // the last node attempted
    assert_eq!(orchestrator.topology().current_datacenter().name(), "dc1");
    let failed = rx.recv().await.unwrap();
    assert_eq!(failed.datacenter, "dc2");
    assert_eq!(failed.error.as_ref().unwrap().class, err.class());
}

#[tokio::test(start_paused = true)]
async fn test_503_never_surfaces_while_a_node_remains() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a", "b"]))
        .datacenter(datacenter("dc2", &["c", "d"]))
        .build()
        .unwrap();
    let backend = MockBackend::default()
        .answer("a", 503)
        .answer("b", 503)
        .answer("c", 503)
        .answer("d", 201);
    let orchestrator = build(
        topology,
        backend,
        RetryPolicy::default(),
        OrchestratorConfig::default(),
    );

    let response = orchestrator
        .call(&CallRequest::put("/v1/items/1", "{}"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(response.status, 201);
    assert_eq!(response.node, "d");
}

#[tokio::test(start_paused = true)]
async fn test_call_deadline() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a"]))
        .build()
        .unwrap();
    let orchestrator = build(
        topology,
        MockBackend::default(),
        RetryPolicy::new(10, Duration::from_secs(1), 1.0),
        OrchestratorConfig {
            call_deadline: Some(Duration::from_millis(2500)),
            ..Default::default()
        },
    );

    let started = Instant::now();
    let err = orchestrator
        .call(&CallRequest::get("/v1/items"))
        .await
        .unwrap_err();

    assert!(matches!(err, CallError::DeadlineExceeded(d) if d == Duration::from_millis(2500)));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2500) && elapsed < Duration::from_secs(3));
    // attempts at 0s, 1s and 2s; the backoff before the fourth was cut short
    assert_eq!(orchestrator.transport().nodes().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_events_for_one_call() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a"]))
        .datacenter(datacenter("dc2", &["b"]))
        .build()
        .unwrap();
    let backend = MockBackend::default().answer("a", 503).answer("b", 200);

    let observers = Arc::new(ObserverBus::new());
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    observers.register(
        "recorder",
        FnCallListener::new(move |e: &CallEvent| {
            let _ = tx.send(e.clone());
        }),
    );

    let orchestrator = CallOrchestrator::new(
        Arc::new(topology),
        Arc::new(backend),
        RetryPolicy::default(),
        OrchestratorConfig::default(),
        observers,
    );
    orchestrator
        .call(&CallRequest::get("/v1/items"))
        .await
        .unwrap();

    // 2 executions x 3 events, node failover, datacenter failover, success
    let mut events = Vec::new();
    for _ in 0..9 {
        events.push(rx.recv().await.unwrap());
    }

    let call_ids: Vec<&str> = events.iter().map(|e| e.call_id.as_str()).collect();
    assert!(call_ids.iter().all(|id| *id == call_ids[0]));

    let count = |kind: CallEventKind| events.iter().filter(|e| e.kind == kind).count();
    assert_eq!(count(CallEventKind::AttemptStarted), 2);
    assert_eq!(count(CallEventKind::AttemptSucceeded), 2);
    assert_eq!(count(CallEventKind::ExecutionSucceeded), 2);
    assert_eq!(count(CallEventKind::NodeFailover), 1);
    assert_eq!(count(CallEventKind::DatacenterFailover), 1);
    assert_eq!(count(CallEventKind::CallSucceeded), 1);

    let done = events
        .iter()
        .find(|e| e.kind == CallEventKind::CallSucceeded)
        .unwrap();
    assert_eq!(done.node.as_deref(), Some("b"));
    assert_eq!(done.datacenter, "dc2");
    assert_eq!(done.operation, "GET /v1/items");
    assert_eq!(done.status, Some(200));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_share_topology() {
    let topology = Topology::builder()
        .datacenter(datacenter("dc1", &["a", "b"]))
        .datacenter(datacenter("dc2", &["c", "d"]))
        .build()
        .unwrap();
    let backend = MockBackend::default()
        .answer("a", 503)
        .answer("b", 503)
        .answer("c", 200)
        .answer("d", 200);
    let orchestrator = Arc::new(build(
        topology,
        backend,
        RetryPolicy::new(1, Duration::from_millis(1), 2.0),
        OrchestratorConfig::default(),
    ));

    let mut handles = Vec::new();
    for _ in 0..32 {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.call(&CallRequest::get("/v1/items")).await
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap().unwrap();
        assert_eq!(response.datacenter, "dc2");
    }
    assert_eq!(orchestrator.topology().current_datacenter().name(), "dc2");
}
