// Call lifecycle events
// Immutable records published to the observer bus; never retained by the core

use std::time::Duration;

/// Type of call lifecycle event
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallEventKind {
    /// An attempt is about to be sent to a node
    AttemptStarted,
    /// An attempt returned a response (of any status)
    AttemptSucceeded,
    /// An attempt failed at the transport level
    AttemptFailed,
    /// The retry executor obtained a response from the node
    ExecutionSucceeded,
    /// The retry executor used up its attempts on the node
    ExecutionFailed,
    /// A node was excluded from selection
    NodeFailover,
    /// The current datacenter was switched
    DatacenterFailover,
    /// The logical call completed successfully
    CallSucceeded,
    /// The logical call failed terminally
    CallFailed,
}

impl std::fmt::Display for CallEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallEventKind::AttemptStarted => write!(f, "ATTEMPT_STARTED"),
            CallEventKind::AttemptSucceeded => write!(f, "ATTEMPT_SUCCEEDED"),
            CallEventKind::AttemptFailed => write!(f, "ATTEMPT_FAILED"),
            CallEventKind::ExecutionSucceeded => write!(f, "EXECUTION_SUCCEEDED"),
            CallEventKind::ExecutionFailed => write!(f, "EXECUTION_FAILED"),
            CallEventKind::NodeFailover => write!(f, "NODE_FAILOVER"),
            CallEventKind::DatacenterFailover => write!(f, "DATACENTER_FAILOVER"),
            CallEventKind::CallSucceeded => write!(f, "CALL_SUCCEEDED"),
            CallEventKind::CallFailed => write!(f, "CALL_FAILED"),
        }
    }
}

impl CallEventKind {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallEventKind::CallSucceeded | CallEventKind::CallFailed)
    }
}

/// Error details carried by failure events.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventError {
    pub class: &'static str,
    pub message: String,
}

/// One call lifecycle event
#[derive(Clone, Debug)]
pub struct CallEvent {
    pub kind: CallEventKind,
    /// Id of the logical call the event belongs to
    pub call_id: String,
    /// Method and target, e.g. "GET /v1/ns"
    pub operation: String,
    pub datacenter: String,
    pub node: Option<String>,
    /// Attempt number on the node, 0 when not attempt-specific
    pub attempt: u32,
    /// Time since the logical call (or execution) started
    pub elapsed: Duration,
    /// Response status, when one was received
    pub status: Option<u16>,
    pub error: Option<EventError>,
    /// Wall-clock timestamp in milliseconds
    pub timestamp: i64,
}

impl CallEvent {
    pub fn new(
        kind: CallEventKind,
        call_id: impl Into<String>,
        operation: impl Into<String>,
        datacenter: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            call_id: call_id.into(),
            operation: operation.into(),
            datacenter: datacenter.into(),
            node: None,
            attempt: 0,
            elapsed: Duration::ZERO,
            status: None,
            error: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    pub fn with_node(mut self, node: impl Into<String>) -> Self {
        self.node = Some(node.into());
        self
    }

    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed = elapsed;
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_error(mut self, class: &'static str, message: impl Into<String>) -> Self {
        self.error = Some(EventError {
            class,
            message: message.into(),
        });
        self
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}
