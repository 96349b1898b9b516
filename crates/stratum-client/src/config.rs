//! Client configuration
//!
//! Loaded from a TOML, YAML or JSON file, with environment overrides of the
//! form `STRATUM_<SECTION>__<KEY>`, e.g. `STRATUM_RETRY__MAX_TRIES=5`.
//!
//! ```toml
//! local_datacenter = "dc1"
//!
//! [retry]
//! max_tries = 3
//! base_delay_ms = 100
//!
//! [[datacenters]]
//! name = "dc1"
//! auth = { username = "svc", password = "secret", login_endpoint = "http://auth.dc1:8080/v1/auth/login" }
//! nodes = [
//!     { id = "dc1-a", endpoint = "http://10.0.0.1:8181" },
//!     { id = "dc1-b", endpoint = "http://10.0.0.2:8181", health_endpoint = "http://10.0.0.2:8182/ping" },
//! ]
//! ```

use std::path::Path;
use std::sync::Arc;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use stratum_core::{
    Datacenter, Node, OrchestratorConfig, RetryPolicy, SelectionStrategy, StaticTokenProvider,
    Topology, TokenProvider,
};

use crate::error::Result;
use crate::health::HealthCheckConfig;
use crate::token::LoginTokenProvider;

pub const ENV_PREFIX: &str = "STRATUM";

/// Full configuration of one client instance.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub retry: RetryPolicy,
    pub orchestrator: OrchestratorConfig,
    pub selection: SelectionStrategy,
    pub health_check: HealthCheckConfig,
    pub user_agent: String,
    /// Datacenter that starts as current; the first one when unset
    pub local_datacenter: Option<String>,
    /// Datacenters in failover order
    pub datacenters: Vec<DatacenterConfig>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            orchestrator: OrchestratorConfig::default(),
            selection: SelectionStrategy::default(),
            health_check: HealthCheckConfig::default(),
            user_agent: format!("stratum-client/{}", env!("CARGO_PKG_VERSION")),
            local_datacenter: None,
            datacenters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatacenterConfig {
    pub name: String,
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub auth: Option<AuthConfig>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeConfig {
    pub id: String,
    pub endpoint: String,
    /// Defaults to `<endpoint>/health`
    #[serde(default)]
    pub health_endpoint: Option<String>,
}

/// Credential source of a datacenter.
#[derive(Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AuthConfig {
    Login {
        username: String,
        password: String,
        login_endpoint: String,
    },
    Token {
        token: String,
    },
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::Login {
                username,
                login_endpoint,
                ..
            } => f
                .debug_struct("Login")
                .field("username", username)
                .field("password", &"******")
                .field("login_endpoint", login_endpoint)
                .finish(),
            AuthConfig::Token { .. } => f.debug_struct("Token").field("token", &"******").finish(),
        }
    }
}

impl ClientConfig {
    /// Load from `path` (format taken from the extension), then apply
    /// `STRATUM_*` environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::load_with_env(path.as_ref(), environment())
    }

    fn load_with_env(path: &Path, env: Environment) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path))
            .add_source(env)
            .build()?;
        Ok(config.try_deserialize()?)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?;
        Ok(config.try_deserialize()?)
    }

    /// Build the topology, including one token provider per datacenter.
    pub fn build_topology(&self) -> Result<Topology> {
        let mut builder = Topology::builder().selection(self.selection);
        if let Some(local) = &self.local_datacenter {
            builder = builder.local_datacenter(local.clone());
        }

        for dc in &self.datacenters {
            let nodes = dc
                .nodes
                .iter()
                .map(|n| Node::parse(n.id.clone(), &n.endpoint, n.health_endpoint.as_deref()))
                .collect::<std::result::Result<Vec<_>, _>>()?;
            let tokens = self.token_provider(dc.auth.as_ref())?;
            builder = builder.datacenter(Datacenter::new(dc.name.clone(), nodes, tokens));
        }

        Ok(builder.build()?)
    }

    fn token_provider(&self, auth: Option<&AuthConfig>) -> Result<Arc<dyn TokenProvider>> {
        Ok(match auth {
            None => Arc::new(StaticTokenProvider::none()),
            Some(AuthConfig::Token { token }) => Arc::new(StaticTokenProvider::new(token.clone())),
            Some(AuthConfig::Login {
                username,
                password,
                login_endpoint,
            }) => Arc::new(LoginTokenProvider::new(
                login_endpoint,
                username,
                password,
                self.retry.request_timeout,
            )?),
        })
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
