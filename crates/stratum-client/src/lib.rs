//! Stratum Client - multi-datacenter client for Stratum services
//!
//! This crate provides:
//! - HTTP and gRPC transports plugged into the `stratum-core` orchestrator
//! - File and environment based configuration
//! - Login-based bearer token providers per datacenter
//! - Optional proactive health checking
//! - Prometheus metrics fed from call lifecycle events

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod logging;
pub mod metrics;
pub mod token;
pub mod transport;

pub use client::{METRICS_LISTENER, StratumClient};
pub use config::{AuthConfig, ClientConfig, DatacenterConfig, NodeConfig};
pub use error::{ClientError, Result};
pub use health::{HealthCheckConfig, HealthChecker, HealthProbe, HealthReport, HttpHealthProbe};
pub use logging::init_logging;
pub use metrics::MetricsListener;
pub use token::LoginTokenProvider;
pub use transport::{HttpTransport, RpcTransport};

pub use stratum_core::{
    CallError, CallEvent, CallEventKind, CallListener, CallRequest, CallResponse, FnCallListener,
    Method, RetryPolicy, TopologySnapshot, Transport,
};
