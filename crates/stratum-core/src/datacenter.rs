//! Datacenter: an ordered, named group of equivalent nodes sharing one
//! credential source

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tracing::debug;

use crate::error::TopologyError;
use crate::node::Node;
use crate::token::TokenProvider;

/// A named group of nodes. Insertion order is the rotation order.
pub struct Datacenter {
    name: String,
    nodes: RwLock<Vec<Arc<Node>>>,
    /// Round-robin position in the full node list
    cursor: AtomicUsize,
    token_provider: Arc<dyn TokenProvider>,
}

impl Datacenter {
    pub fn new(
        name: impl Into<String>,
        nodes: Vec<Node>,
        token_provider: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            name: name.into(),
            nodes: RwLock::new(nodes.into_iter().map(Arc::new).collect()),
            cursor: AtomicUsize::new(0),
            token_provider,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// All nodes in rotation order, available or not.
    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.read().clone()
    }

    /// Nodes currently marked available, in rotation order.
    pub fn available_nodes(&self) -> Vec<Arc<Node>> {
        self.nodes
            .read()
            .iter()
            .filter(|n| n.is_available())
            .cloned()
            .collect()
    }

    pub fn node(&self, id: &str) -> Option<Arc<Node>> {
        self.nodes.read().iter().find(|n| n.id() == id).cloned()
    }

    pub fn total_count(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn available_count(&self) -> usize {
        self.nodes.read().iter().filter(|n| n.is_available()).count()
    }

    /// A datacenter with zero available nodes is exhausted.
    pub fn is_exhausted(&self) -> bool {
        self.available_count() == 0
    }

    pub fn token_provider(&self) -> &Arc<dyn TokenProvider> {
        &self.token_provider
    }

    /// Current round-robin position in the full node list.
    pub(crate) fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    /// Move the cursor from `observed` to `next`; false if another caller
    /// moved it first.
    pub(crate) fn advance_cursor(&self, observed: usize, next: usize) -> bool {
        self.cursor
            .compare_exchange(observed, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn add_node(&self, node: Node) -> Result<Arc<Node>, TopologyError> {
        let mut nodes = self.nodes.write();
        if nodes.iter().any(|n| n.id() == node.id()) {
            return Err(TopologyError::DuplicateNode {
                datacenter: self.name.clone(),
                node: node.id().to_string(),
            });
        }
        let node = Arc::new(node);
        nodes.push(node.clone());
        debug!(
            datacenter = %self.name,
            node = %node.id(),
            "Added node to datacenter rotation"
        );
        Ok(node)
    }

    /// Mark every node available again, returning how many changed.
    pub(crate) fn reset(&self) -> usize {
        self.nodes
            .read()
            .iter()
            .filter(|n| !n.set_available(true))
            .count()
    }
}

impl fmt::Debug for Datacenter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Datacenter")
            .field("name", &self.name)
            .field("nodes", &*self.nodes.read())
            .finish_non_exhaustive()
    }
}

/// Point-in-time availability of one datacenter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatacenterStatus {
    pub name: String,
    pub available_nodes: usize,
    pub total_nodes: usize,
    pub is_current: bool,
}
