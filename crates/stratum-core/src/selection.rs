//! Node selection within a datacenter
//!
//! Round-robin (default) walks the datacenter's node list with a per-datacenter
//! atomic cursor, skipping nodes marked unavailable, so every available node
//! gets an equal share. Random picks uniformly among available nodes from a
//! seeded `StdRng`, so a fixed seed gives a reproducible sequence.

use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;

use crate::datacenter::Datacenter;
use crate::node::Node;

/// How the next node is chosen among a datacenter's available nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum SelectionStrategy {
    #[default]
    RoundRobin,
    Random {
        #[serde(default)]
        seed: Option<u64>,
    },
}

pub(crate) enum Selector {
    RoundRobin,
    Random(Mutex<StdRng>),
}

impl Selector {
    pub(crate) fn new(strategy: SelectionStrategy) -> Self {
        match strategy {
            SelectionStrategy::RoundRobin => Selector::RoundRobin,
            SelectionStrategy::Random { seed } => {
                let rng = match seed {
                    Some(seed) => StdRng::seed_from_u64(seed),
                    None => StdRng::from_os_rng(),
                };
                Selector::Random(Mutex::new(rng))
            }
        }
    }

    /// Pick the next available node, or `None` if the datacenter is exhausted.
    pub(crate) fn select(&self, datacenter: &Datacenter) -> Option<Arc<Node>> {
        match self {
            Selector::RoundRobin => loop {
                // The cursor lands just past the chosen node, so a down node
                // is skipped once per cycle instead of handing its turn to
                // the successor.
                let nodes = datacenter.nodes();
                if nodes.is_empty() {
                    return None;
                }
                let cursor = datacenter.cursor();
                let (offset, node) = (0..nodes.len())
                    .map(|offset| (offset, &nodes[cursor.wrapping_add(offset) % nodes.len()]))
                    .find(|(_, node)| node.is_available())?;
                if datacenter.advance_cursor(cursor, cursor.wrapping_add(offset + 1)) {
                    return Some(node.clone());
                }
            },
            Selector::Random(rng) => {
                let available = datacenter.available_nodes();
                if available.is_empty() {
                    return None;
                }
                let index = rng.lock().random_range(0..available.len());
                available.get(index).cloned()
            }
        }
    }
}
