//! Stratum core: resilient remote calls over a multi-datacenter topology
//!
//! This crate holds the transport-independent part of a Stratum client:
//! - [`Topology`]: datacenters, nodes, liveness and the current datacenter
//! - [`RetryExecutor`]: bounded retries with exponential backoff on one node
//! - [`classify`]: maps a status code onto a fixed outcome taxonomy
//! - [`CallOrchestrator`]: node and datacenter failover around the above
//! - [`ObserverBus`]: fire-and-forget call lifecycle events
//!
//! Concrete HTTP and RPC transports live in `stratum-client`; they plug in
//! through the [`Transport`] trait.

pub mod classifier;
pub mod datacenter;
pub mod error;
pub mod event;
pub mod executor;
pub mod node;
pub mod observer;
pub mod orchestrator;
pub mod policy;
pub mod selection;
pub mod token;
pub mod topology;
pub mod transport;

pub use classifier::{Outcome, classify};
pub use datacenter::{Datacenter, DatacenterStatus};
pub use error::{CallError, Result, TokenError, TopologyError, TransportError};
pub use event::{CallEvent, CallEventKind, EventError};
pub use executor::RetryExecutor;
pub use node::Node;
pub use observer::{CallListener, FnCallListener, ObserverBus};
pub use orchestrator::{CallOrchestrator, CallResponse};
pub use policy::{OrchestratorConfig, RetryPolicy};
pub use selection::SelectionStrategy;
pub use token::{StaticTokenProvider, TokenProvider};
pub use topology::{LoadBalancedResource, Topology, TopologyBuilder, TopologySnapshot};
pub use transport::{AttemptContext, CONTENT_TYPE_JSON, CallRequest, Method, RawResponse, Transport};
