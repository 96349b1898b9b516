//! Deployment topology: ordered datacenters with a "current" cursor
//!
//! The topology owns all shared mutable availability state:
//! - each node's liveness flag
//! - each datacenter's round-robin cursor
//! - the current-datacenter cursor
//!
//! All three are atomics, so concurrent calls can race to mark the same node
//! down or advance the datacenter cursor without locking each other out.
//! Only membership changes take a lock, so two racing `add_node` calls cannot
//! both register the same id.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::datacenter::{Datacenter, DatacenterStatus};
use crate::error::{CallError, TokenError, TopologyError};
use crate::node::Node;
use crate::selection::{SelectionStrategy, Selector};

/// Handle returned by node lookup, used to report a failure against the
/// exact node and datacenter that were tried.
#[derive(Debug, Clone)]
pub struct LoadBalancedResource {
    node: Arc<Node>,
    datacenter: Arc<Datacenter>,
    datacenter_index: usize,
}

impl LoadBalancedResource {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    pub fn datacenter(&self) -> &Arc<Datacenter> {
        &self.datacenter
    }

    /// Position of the datacenter in the topology's fixed order.
    pub fn datacenter_index(&self) -> usize {
        self.datacenter_index
    }
}

/// Ordered collection of datacenters with exactly one current.
pub struct Topology {
    datacenters: Vec<Arc<Datacenter>>,
    current: AtomicUsize,
    selector: Selector,
    /// Held across the uniqueness check and insert of `add_node`
    membership: Mutex<()>,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    /// Select the next available node of the current datacenter.
    pub fn lookup_node(&self) -> Result<LoadBalancedResource, CallError> {
        self.lookup_node_in(self.current_index())
    }

    /// Select the next available node of the datacenter at `index`.
    pub fn lookup_node_in(&self, index: usize) -> Result<LoadBalancedResource, CallError> {
        let index = index % self.datacenters.len();
        let datacenter = &self.datacenters[index];

        match self.selector.select(datacenter) {
            Some(node) => {
                debug!(
                    datacenter = %datacenter.name(),
                    node = %node.id(),
                    "Selected node"
                );
                Ok(LoadBalancedResource {
                    node,
                    datacenter: datacenter.clone(),
                    datacenter_index: index,
                })
            }
            None => Err(CallError::NoAvailableNode {
                datacenter: datacenter.name().to_string(),
            }),
        }
    }

    /// Credential of the current datacenter.
    pub async fn lookup_token(&self) -> Result<String, TokenError> {
        let datacenter = self.current_datacenter();
        datacenter.token_provider().token().await
    }

    /// Exclude `resource.node` from selection.
    ///
    /// Returns `NoAvailableNode` when its datacenter is now exhausted, which
    /// tells the caller to escalate to datacenter failover.
    pub fn failover_node(
        &self,
        resource: &LoadBalancedResource,
        cause: &CallError,
    ) -> Result<(), CallError> {
        let datacenter = resource.datacenter();
        if resource.node.set_available(false) {
            warn!(
                datacenter = %datacenter.name(),
                node = %resource.node.id(),
                cause = %cause,
                "Node marked unavailable"
            );
        }

        if datacenter.is_exhausted() {
            warn!(datacenter = %datacenter.name(), "Datacenter exhausted");
            return Err(CallError::NoAvailableNode {
                datacenter: datacenter.name().to_string(),
            });
        }
        Ok(())
    }

    /// Advance the current datacenter to the next one, wrapping after the
    /// last. Node availability of the departed datacenter is left untouched.
    pub fn failover_datacenter(&self) -> Arc<Datacenter> {
        let len = self.datacenters.len();
        let previous = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| Some((c + 1) % len))
            .unwrap_or_else(|c| c);
        let next = (previous + 1) % len;
        self.log_switch(previous, next);
        self.datacenters[next].clone()
    }

    /// Advance past the datacenter at `observed` only if it is still current.
    ///
    /// When several calls find the same datacenter exhausted at once, only the
    /// first one rotates; the others adopt whatever is current by then.
    pub fn failover_datacenter_from(&self, observed: usize) -> Arc<Datacenter> {
        let len = self.datacenters.len();
        let observed = observed % len;
        let next = (observed + 1) % len;

        match self
            .current
            .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.log_switch(observed, next);
                self.datacenters[next].clone()
            }
            Err(actual) => {
                debug!(
                    observed = %self.datacenters[observed].name(),
                    current = %self.datacenters[actual].name(),
                    "Datacenter already switched by a concurrent call"
                );
                self.datacenters[actual].clone()
            }
        }
    }

    pub fn current_index(&self) -> usize {
        self.current.load(Ordering::Acquire)
    }

    pub fn current_datacenter(&self) -> Arc<Datacenter> {
        self.datacenters[self.current_index()].clone()
    }

    pub fn datacenters(&self) -> &[Arc<Datacenter>] {
        &self.datacenters
    }

    pub fn datacenter(&self, name: &str) -> Option<&Arc<Datacenter>> {
        self.datacenters.iter().find(|dc| dc.name() == name)
    }

    /// Locate a node by id across all datacenters.
    pub fn find_node(&self, node_id: &str) -> Option<(Arc<Datacenter>, Arc<Node>)> {
        self.datacenters
            .iter()
            .find_map(|dc| dc.node(node_id).map(|node| (dc.clone(), node)))
    }

    /// Set a node's liveness; returns true if it changed.
    pub fn set_node_availability(
        &self,
        node_id: &str,
        available: bool,
    ) -> Result<bool, TopologyError> {
        let (datacenter, node) = self
            .find_node(node_id)
            .ok_or_else(|| TopologyError::UnknownNode(node_id.to_string()))?;

        let changed = node.set_available(available) != available;
        if changed {
            info!(
                datacenter = %datacenter.name(),
                node = %node_id,
                available,
                "Node availability changed"
            );
        }
        Ok(changed)
    }

    /// Re-admit a node into its datacenter's rotation.
    pub fn mark_node_available(&self, node_id: &str) -> Result<bool, TopologyError> {
        self.set_node_availability(node_id, true)
    }

    /// Mark every node of a datacenter available again.
    pub fn reset_datacenter(&self, name: &str) -> Result<usize, TopologyError> {
        let datacenter = self
            .datacenter(name)
            .ok_or_else(|| TopologyError::UnknownDatacenter(name.to_string()))?;
        let restored = datacenter.reset();
        info!(datacenter = %name, restored, "Datacenter reset");
        Ok(restored)
    }

    /// Append a node to a datacenter's rotation. Node ids are unique across
    /// the whole topology.
    pub fn add_node(&self, datacenter: &str, node: Node) -> Result<Arc<Node>, TopologyError> {
        let _membership = self.membership.lock();
        if self.find_node(node.id()).is_some() {
            return Err(TopologyError::DuplicateNode {
                datacenter: datacenter.to_string(),
                node: node.id().to_string(),
            });
        }
        self.datacenter(datacenter)
            .ok_or_else(|| TopologyError::UnknownDatacenter(datacenter.to_string()))?
            .add_node(node)
    }

    pub fn snapshot(&self) -> TopologySnapshot {
        let current = self.current_index();
        TopologySnapshot {
            current: self.datacenters[current].name().to_string(),
            datacenters: self
                .datacenters
                .iter()
                .enumerate()
                .map(|(i, dc)| DatacenterStatus {
                    name: dc.name().to_string(),
                    available_nodes: dc.available_count(),
                    total_nodes: dc.total_count(),
                    is_current: i == current,
                })
                .collect(),
        }
    }

    fn log_switch(&self, from: usize, to: usize) {
        info!(
            from = %self.datacenters[from].name(),
            to = %self.datacenters[to].name(),
            "Switched current datacenter"
        );
    }
}

/// Availability overview of the whole topology.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologySnapshot {
    pub current: String,
    pub datacenters: Vec<DatacenterStatus>,
}

/// Builder for [`Topology`].
#[derive(Default)]
pub struct TopologyBuilder {
    datacenters: Vec<Datacenter>,
    local: Option<String>,
    strategy: SelectionStrategy,
}

impl TopologyBuilder {
    /// Append a datacenter; order of calls is the failover order.
    pub fn datacenter(mut self, datacenter: Datacenter) -> Self {
        self.datacenters.push(datacenter);
        self
    }

    /// Name of the datacenter that starts as current. Defaults to the first.
    pub fn local_datacenter(mut self, name: impl Into<String>) -> Self {
        self.local = Some(name.into());
        self
    }

    pub fn selection(mut self, strategy: SelectionStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn build(self) -> Result<Topology, TopologyError> {
        if self.datacenters.is_empty() {
            return Err(TopologyError::Empty);
        }

        let mut dc_names = HashSet::new();
        let mut node_ids = HashSet::new();
        for dc in &self.datacenters {
            if !dc_names.insert(dc.name().to_string()) {
                return Err(TopologyError::DuplicateDatacenter(dc.name().to_string()));
            }
            if dc.total_count() == 0 {
                return Err(TopologyError::EmptyDatacenter(dc.name().to_string()));
            }
            for node in dc.nodes() {
                if !node_ids.insert(node.id().to_string()) {
                    return Err(TopologyError::DuplicateNode {
                        datacenter: dc.name().to_string(),
                        node: node.id().to_string(),
                    });
                }
            }
        }

        let current = match &self.local {
            Some(local) => self
                .datacenters
                .iter()
                .position(|dc| dc.name() == local)
                .ok_or_else(|| TopologyError::UnknownDatacenter(local.clone()))?,
            None => 0,
        };

        info!(
            datacenters = self.datacenters.len(),
            local = %self.datacenters[current].name(),
            "Initialized topology"
        );

        Ok(Topology {
            datacenters: self.datacenters.into_iter().map(Arc::new).collect(),
            current: AtomicUsize::new(current),
            selector: Selector::new(self.strategy),
            membership: Mutex::new(()),
        })
    }
}
