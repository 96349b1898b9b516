//! gRPC transport
//!
//! Every call is one unary `Invoker/invoke` round trip carrying a [`Payload`]:
//! the RPC method name, call target and per-attempt request id travel in its
//! [`Metadata`], the serialized message in its body. The bearer token goes
//! into the `authorization` request metadata.
//!
//! gRPC status codes are folded onto the HTTP status the classifier expects,
//! so RPC and HTTP calls share one failover policy.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use http::uri::PathAndQuery;
use stratum_core::{
    AttemptContext, CallError, CallRequest, Method, Node, RawResponse, RetryPolicy, Transport,
    TransportError,
};
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::{Code, Request, Status};
use tracing::{debug, trace};

pub const INVOKE_PATH: &str = "/stratum.Invoker/invoke";

pub const HEADER_TARGET: &str = "target";
pub const HEADER_CONTENT_TYPE: &str = "content-type";
pub const HEADER_ACCEPT: &str = "accept";
/// Response header carrying an HTTP-style status; absent means 200
pub const HEADER_STATUS: &str = "status";

#[derive(Clone, PartialEq, prost::Message)]
pub struct Metadata {
    #[prost(string, tag = "1")]
    pub r#type: String,
    #[prost(string, tag = "2")]
    pub request_id: String,
    #[prost(map = "string, string", tag = "3")]
    pub headers: HashMap<String, String>,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct Payload {
    #[prost(message, optional, tag = "2")]
    pub metadata: Option<Metadata>,
    #[prost(bytes = "bytes", tag = "3")]
    pub body: Bytes,
}

impl Payload {
    /// Status carried in the payload metadata; 200 when the header is absent.
    fn status(&self) -> Result<u16, TransportError> {
        match self.metadata.as_ref().and_then(|m| m.headers.get(HEADER_STATUS)) {
            None => Ok(200),
            Some(raw) => raw
                .trim()
                .parse()
                .map_err(|_| TransportError::Protocol(format!("malformed status header: {:?}", raw))),
        }
    }
}

/// Sends each attempt as a unary gRPC call over a per-node channel.
pub struct RpcTransport {
    channels: DashMap<String, Channel>,
    connect_timeout: Duration,
    request_timeout: Duration,
    user_agent: String,
}

impl RpcTransport {
    pub fn new(policy: &RetryPolicy, user_agent: impl Into<String>) -> Self {
        Self {
            channels: DashMap::new(),
            connect_timeout: policy.connect_timeout,
            request_timeout: policy.request_timeout,
            user_agent: user_agent.into(),
        }
    }

    /// Number of nodes with an open (or lazily opening) channel.
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    fn channel(&self, node: &Node) -> Result<Channel, TransportError> {
        if let Some(channel) = self.channels.get(node.id()) {
            return Ok(channel.clone());
        }

        let endpoint = Endpoint::from_shared(node.endpoint().to_string())
            .map_err(|e| TransportError::Protocol(format!("invalid grpc endpoint: {}", e)))?
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .user_agent(self.user_agent.clone())
            .map_err(|e| TransportError::Protocol(format!("invalid user agent: {}", e)))?;

        debug!(node = %node.id(), endpoint = %node.endpoint(), "Opening grpc channel");
        let channel = self
            .channels
            .entry(node.id().to_string())
            .or_insert_with(|| endpoint.connect_lazy())
            .clone();
        Ok(channel)
    }

    fn build_request(request: &CallRequest, context: &AttemptContext) -> Result<Request<Payload>, TransportError> {
        let headers = HashMap::from([
            (HEADER_TARGET.to_string(), request.target.clone()),
            (HEADER_CONTENT_TYPE.to_string(), request.content_type.clone()),
            (HEADER_ACCEPT.to_string(), request.accept.clone()),
        ]);
        let payload = Payload {
            metadata: Some(Metadata {
                r#type: request.method.to_string(),
                request_id: context.request_id.clone(),
                headers,
            }),
            body: request.body.clone(),
        };

        let mut grpc_request = Request::new(payload);
        if !context.token.is_empty() {
            let value = MetadataValue::try_from(format!("Bearer {}", context.token))
                .map_err(|e| TransportError::Protocol(format!("invalid token: {}", e)))?;
            grpc_request.metadata_mut().insert("authorization", value);
        }
        Ok(grpc_request)
    }

    fn map_status(&self, status: Status) -> Result<RawResponse, TransportError> {
        let transport_failure = std::error::Error::source(&status).is_some();
        match status.code() {
            Code::DeadlineExceeded => Err(TransportError::Timeout(self.request_timeout)),
            Code::Cancelled if transport_failure => Err(TransportError::Timeout(self.request_timeout)),
            Code::Cancelled => Err(TransportError::Io(status.message().to_string())),
            _ if transport_failure => Err(TransportError::Connect(status.to_string())),
            code => Ok(RawResponse::new(
                http_status(code),
                Bytes::copy_from_slice(status.message().as_bytes()),
            )),
        }
    }
}

/// HTTP-equivalent status of a gRPC code.
pub fn http_status(code: Code) -> u16 {
    match code {
        Code::Ok => 200,
        Code::InvalidArgument | Code::OutOfRange | Code::FailedPrecondition => 400,
        Code::Unauthenticated => 401,
        Code::PermissionDenied => 403,
        Code::NotFound => 404,
        Code::AlreadyExists | Code::Aborted => 409,
        Code::Unavailable | Code::ResourceExhausted => 503,
        Code::Unimplemented => 501,
        Code::DeadlineExceeded => 504,
        Code::Cancelled => 499,
        Code::Internal | Code::Unknown | Code::DataLoss => 500,
    }
}

#[async_trait]
impl Transport for RpcTransport {
    async fn send(
        &self,
        node: &Node,
        request: &CallRequest,
        context: &AttemptContext,
    ) -> Result<RawResponse, TransportError> {
        let channel = self.channel(node)?;
        let grpc_request = Self::build_request(request, context)?;
        trace!(node = %node.id(), method = %request.method, attempt = context.attempt, "Sending grpc request");

        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| TransportError::Connect(format!("channel not ready: {}", e)))?;

        let codec = tonic_prost::ProstCodec::<Payload, Payload>::default();
        match grpc
            .unary(grpc_request, PathAndQuery::from_static(INVOKE_PATH), codec)
            .await
        {
            Ok(response) => {
                let payload = response.into_inner();
                Ok(RawResponse::new(payload.status()?, payload.body))
            }
            Err(status) => self.map_status(status),
        }
    }

    fn validate(&self, request: &CallRequest) -> Result<(), CallError> {
        match request.method {
            Method::Rpc(_) => Ok(()),
            ref other => Err(CallError::UnsupportedRequest(format!(
                "http method {} cannot be sent over grpc",
                other
            ))),
        }
    }
}
