//! Transport capability: how one attempt reaches one node
//!
//! HTTP and RPC clients implement [`Transport`]; the topology, retry,
//! classification and orchestration logic is shared over it.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use serde::Serialize;

use crate::error::{CallError, TransportError};
use crate::node::Node;

pub const CONTENT_TYPE_JSON: &str = "application/json";

/// Method of one call: an HTTP verb or a named RPC method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Rpc(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Head => "HEAD",
            Method::Rpc(name) => name,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything needed to perform one logical call against any node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub method: Method,
    /// URL path suffix (HTTP) or call target (RPC)
    pub target: String,
    pub body: Bytes,
    pub content_type: String,
    pub accept: String,
    /// When false, a 404 is a soft "not found" instead of an error
    pub mandatory: bool,
}

impl CallRequest {
    pub fn new(method: Method, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            body: Bytes::new(),
            content_type: CONTENT_TYPE_JSON.to_string(),
            accept: CONTENT_TYPE_JSON.to_string(),
            mandatory: true,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(Method::Get, target)
    }

    pub fn post(target: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Post, target).with_body(body)
    }

    pub fn put(target: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Put, target).with_body(body)
    }

    pub fn patch(target: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Patch, target).with_body(body)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(Method::Delete, target)
    }

    pub fn head(target: impl Into<String>) -> Self {
        Self::new(Method::Head, target)
    }

    pub fn rpc(method: impl Into<String>, target: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::Rpc(method.into()), target).with_body(body)
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn with_json<T: Serialize + ?Sized>(mut self, value: &T) -> serde_json::Result<Self> {
        self.body = Bytes::from(serde_json::to_vec(value)?);
        self.content_type = CONTENT_TYPE_JSON.to_string();
        Ok(self)
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_accept(mut self, accept: impl Into<String>) -> Self {
        self.accept = accept.into();
        self
    }

    pub fn mandatory(mut self, mandatory: bool) -> Self {
        self.mandatory = mandatory;
        self
    }
}

/// Unclassified response of one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Bytes,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Per-attempt metadata the transport attaches to the outgoing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptContext {
    /// 1-based attempt number within one node's retry sequence
    pub attempt: u32,
    /// Unique id of this attempt
    pub request_id: String,
    /// Bearer credential of the current datacenter; empty means none
    pub token: String,
}

impl AttemptContext {
    pub fn new(attempt: u32, token: String) -> Self {
        Self {
            attempt,
            request_id: uuid::Uuid::new_v4().to_string(),
            token,
        }
    }
}

/// Performs one network attempt against one node.
///
/// Any `Err` is treated as transient and retried; a response of any status
/// is returned as `Ok` and classified by the caller.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn send(
        &self,
        node: &Node,
        request: &CallRequest,
        context: &AttemptContext,
    ) -> Result<RawResponse, TransportError>;

    /// Reject a request this transport cannot carry before any node is
    /// tried. Failures here are never retried.
    fn validate(&self, _request: &CallRequest) -> Result<(), CallError> {
        Ok(())
    }
}
