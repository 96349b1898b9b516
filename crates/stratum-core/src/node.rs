//! Backend node: one addressable instance of the service

use std::sync::atomic::{AtomicBool, Ordering};

use url::Url;

use crate::error::TopologyError;

/// One addressable backend instance.
///
/// Liveness is written only by the topology (failover, recovery and the
/// health checker), never by callers.
#[derive(Debug)]
pub struct Node {
    id: String,
    endpoint: Url,
    health_endpoint: Url,
    available: AtomicBool,
}

impl Node {
    pub fn new(id: impl Into<String>, endpoint: Url, health_endpoint: Url) -> Self {
        Self {
            id: id.into(),
            endpoint,
            health_endpoint,
            available: AtomicBool::new(true),
        }
    }

    /// Parse a node from string endpoints.
    ///
    /// When `health_endpoint` is `None` the health address defaults to
    /// `<endpoint>/health`.
    pub fn parse(
        id: impl Into<String>,
        endpoint: &str,
        health_endpoint: Option<&str>,
    ) -> Result<Self, TopologyError> {
        let endpoint = parse_url(endpoint)?;
        let health_endpoint = match health_endpoint {
            Some(addr) => parse_url(addr)?,
            None => default_health_endpoint(&endpoint),
        };
        Ok(Self::new(id, endpoint, health_endpoint))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn health_endpoint(&self) -> &Url {
        &self.health_endpoint
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Set liveness, returning the previous value.
    pub(crate) fn set_available(&self, available: bool) -> bool {
        self.available.swap(available, Ordering::AcqRel)
    }
}

fn parse_url(addr: &str) -> Result<Url, TopologyError> {
    Url::parse(addr).map_err(|source| TopologyError::InvalidEndpoint {
        endpoint: addr.to_string(),
        source,
    })
}

fn default_health_endpoint(endpoint: &Url) -> Url {
    let mut url = endpoint.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments.pop_if_empty().push("health");
    }
    url
}
