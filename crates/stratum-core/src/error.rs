//! Error taxonomy for the call core
//!
//! - `TopologyError`: problems building or addressing the topology
//! - `TransportError`: failures inside one attempt (retryable)
//! - `TokenError`: the datacenter credential could not be obtained
//! - `CallError`: everything a caller of one logical call can observe

use std::time::Duration;

/// Error raised while building or addressing a topology.
#[derive(Debug, thiserror::Error)]
pub enum TopologyError {
    #[error("topology has no datacenters")]
    Empty,

    #[error("datacenter '{0}' has no nodes")]
    EmptyDatacenter(String),

    #[error("duplicate datacenter '{0}'")]
    DuplicateDatacenter(String),

    #[error("duplicate node '{node}' in datacenter '{datacenter}'")]
    DuplicateNode { datacenter: String, node: String },

    #[error("unknown datacenter '{0}'")]
    UnknownDatacenter(String),

    #[error("unknown node '{0}'")]
    UnknownNode(String),

    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        endpoint: String,
        #[source]
        source: url::ParseError,
    },
}

/// Failure of a single network attempt. Always retryable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("i/o error: {0}")]
    Io(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Short machine-readable class name, used in events and metrics.
    pub fn class(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "timeout",
            TransportError::Connect(_) => "connect",
            TransportError::Io(_) => "io",
            TransportError::Protocol(_) => "protocol",
        }
    }
}

/// Failure of a datacenter token source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenError {
    #[error("token unavailable: {0}")]
    Unavailable(String),

    #[error("authentication rejected: {0}")]
    Rejected(String),
}

/// Error returned from one logical call.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    #[error("invalid request: status={status}, body={body}")]
    InvalidRequest { status: u16, body: String },

    #[error("authentication failure: status={status}, body={body}")]
    AuthenticationFailure { status: u16, body: String },

    #[error("conflict: {body}")]
    Conflict { body: String },

    #[error("not found: {body}")]
    NotFound { body: String },

    #[error("service unavailable on node {node}: {body}")]
    ServiceUnavailable { node: String, body: String },

    #[error("unexpected response: status={status}, body={body}")]
    UnknownFailure { status: u16, body: String },

    #[error("retries exhausted after {attempts} attempt(s) on node {node}: {source}")]
    RetriesExhausted {
        node: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("no available node in datacenter '{datacenter}'")]
    NoAvailableNode { datacenter: String },

    #[error(
        "no backend instance could serve this request ({datacenters} datacenter(s) tried)"
    )]
    AllResourcesUnavailable {
        datacenters: usize,
        #[source]
        last_cause: Option<Box<CallError>>,
    },

    #[error("unsupported request: {0}")]
    UnsupportedRequest(String),

    #[error("call deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error(transparent)]
    Token(#[from] TokenError),
}

impl CallError {
    /// Status code of the response that produced this error, if there was one.
    pub fn status(&self) -> Option<u16> {
        match self {
            CallError::InvalidRequest { status, .. }
            | CallError::AuthenticationFailure { status, .. }
            | CallError::UnknownFailure { status, .. } => Some(*status),
            CallError::Conflict { .. } => Some(409),
            CallError::NotFound { .. } => Some(404),
            CallError::ServiceUnavailable { .. } => Some(503),
            _ => None,
        }
    }

    /// Response body of the failing call, if there was one.
    pub fn body(&self) -> Option<&str> {
        match self {
            CallError::InvalidRequest { body, .. }
            | CallError::AuthenticationFailure { body, .. }
            | CallError::Conflict { body }
            | CallError::NotFound { body }
            | CallError::ServiceUnavailable { body, .. }
            | CallError::UnknownFailure { body, .. } => Some(body),
            _ => None,
        }
    }

    /// True for errors that describe the request or its credentials rather
    /// than the availability of a node.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            CallError::InvalidRequest { .. }
                | CallError::AuthenticationFailure { .. }
                | CallError::Conflict { .. }
                | CallError::NotFound { .. }
                | CallError::UnknownFailure { .. }
                | CallError::UnsupportedRequest(_)
                | CallError::Token(_)
        )
    }

    /// True when no backend instance anywhere could serve the call.
    pub fn is_exhaustion(&self) -> bool {
        matches!(self, CallError::AllResourcesUnavailable { .. })
    }

    /// Short machine-readable class name, used in events and metrics.
    pub fn class(&self) -> &'static str {
        match self {
            CallError::InvalidRequest { .. } => "invalid_request",
            CallError::AuthenticationFailure { .. } => "authentication_failure",
            CallError::Conflict { .. } => "conflict",
            CallError::NotFound { .. } => "not_found",
            CallError::ServiceUnavailable { .. } => "service_unavailable",
            CallError::UnknownFailure { .. } => "unknown_failure",
            CallError::RetriesExhausted { .. } => "retries_exhausted",
            CallError::NoAvailableNode { .. } => "no_available_node",
            CallError::AllResourcesUnavailable { .. } => "all_resources_unavailable",
            CallError::UnsupportedRequest(_) => "unsupported_request",
            CallError::DeadlineExceeded(_) => "deadline_exceeded",
            CallError::Token(_) => "token",
        }
    }
}

pub type Result<T> = std::result::Result<T, CallError>;
