//! HTTP transport over a shared `reqwest` connection pool

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use stratum_core::{
    AttemptContext, CallError, CallRequest, Method, Node, RawResponse, RetryPolicy, Transport,
    TransportError,
};
use tracing::trace;
use url::Url;

use crate::error::Result;

pub const REQUEST_ID_HEADER: &str = "X-Request-Id";

/// Sends each attempt as one HTTP request to `<node endpoint><target>`.
pub struct HttpTransport {
    client: Client,
    user_agent: String,
    request_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport with its own connection pool, using the policy's
    /// connect and request timeouts.
    pub fn new(policy: &RetryPolicy, user_agent: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(policy.connect_timeout)
            .timeout(policy.request_timeout)
            .build()?;
        Ok(Self::with_client(client, user_agent, policy.request_timeout))
    }

    /// Use an existing `reqwest` client (and its pool).
    pub fn with_client(client: Client, user_agent: impl Into<String>, request_timeout: Duration) -> Self {
        Self {
            client,
            user_agent: user_agent.into(),
            request_timeout,
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn method(method: &Method) -> std::result::Result<reqwest::Method, TransportError> {
        Ok(match method {
            Method::Get => reqwest::Method::GET,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Patch => reqwest::Method::PATCH,
            Method::Delete => reqwest::Method::DELETE,
            Method::Head => reqwest::Method::HEAD,
            Method::Rpc(name) => {
                return Err(TransportError::Protocol(format!(
                    "rpc method '{}' cannot be sent over http",
                    name
                )));
            }
        })
    }

    fn map_error(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.request_timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else if e.is_builder() {
            TransportError::Protocol(e.to_string())
        } else {
            TransportError::Io(e.to_string())
        }
    }
}

/// Join a node endpoint and a call target without dropping the endpoint's
/// own path prefix.
pub fn build_url(endpoint: &Url, target: &str) -> std::result::Result<Url, TransportError> {
    let base = endpoint.as_str().trim_end_matches('/');
    let url = if target.is_empty() {
        base.to_string()
    } else if target.starts_with('/') {
        format!("{}{}", base, target)
    } else {
        format!("{}/{}", base, target)
    };
    Url::parse(&url).map_err(|e| TransportError::Protocol(format!("invalid url '{}': {}", url, e)))
}

#[async_trait]
impl Transport for HttpTransport {
    async fn send(
        &self,
        node: &Node,
        request: &CallRequest,
        context: &AttemptContext,
    ) -> std::result::Result<RawResponse, TransportError> {
        let method = Self::method(&request.method)?;
        let url = build_url(node.endpoint(), &request.target)?;
        trace!(node = %node.id(), %method, %url, attempt = context.attempt, "Sending http request");

        let mut builder = self
            .client
            .request(method, url)
            .header(CONTENT_TYPE, &request.content_type)
            .header(ACCEPT, &request.accept)
            .header(USER_AGENT, &self.user_agent)
            .header(REQUEST_ID_HEADER, &context.request_id);
        if !context.token.is_empty() {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", context.token));
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await.map_err(|e| self.map_error(e))?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(|e| self.map_error(e))?;
        Ok(RawResponse::new(status, body))
    }

    fn validate(&self, request: &CallRequest) -> std::result::Result<(), CallError> {
        Self::method(&request.method)
            .map(|_| ())
            .map_err(|e| CallError::UnsupportedRequest(e.to_string()))
    }
}
