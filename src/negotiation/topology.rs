//! Negotiation topology setup
//!
//! A topology lists every node, its RC capacity and the peers it knows with an
//! initial score. Nodes start with every peer in DC. Validation happens here
//! so that a protocol violation at run time points at a protocol bug rather
//! than at a bad setup file.
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::info;

use super::graph::Graph;
use super::messages::NodeId;
use super::node::{Node, Peer};
use crate::config_error;
use crate::error::Result;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: NodeId,
    /// Falls back to the configured default capacity when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<usize>,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub nodes: Vec<NodeSpec>,
}

impl Topology {
    pub fn from_json(data: &str) -> Result<Self> {
        Ok(serde_json::from_str(data)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let topology = Self::from_json(&data)?;
        info!(
            "Loaded topology with {} nodes from {}",
            topology.nodes.len(),
            path.display()
        );
        Ok(topology)
    }

    /// Three-node demo: nodes 0 and 2 are each other's best peer, node 1 is
    /// left without an RC partner once they settle.
    pub fn demo() -> Self {
        let spec = |id: u32, peers: &[(u32, u64)]| NodeSpec {
            id: NodeId::new(id),
            capacity: None,
            peers: peers
                .iter()
                .map(|&(peer, score)| Peer::new(peer, score))
                .collect(),
        };
        Self {
            nodes: vec![
                spec(0, &[(1, 200), (2, 100)]),
                spec(1, &[(0, 200), (2, 300)]),
                spec(2, &[(0, 300), (1, 300)]),
            ],
        }
    }

    /// Every node knows every other node; scores are drawn independently for
    /// each direction from `1..=1000`.
    pub fn full_mesh(size: u32, seed: Option<u64>) -> Self {
        let mut rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let nodes = (0..size)
            .map(|id| NodeSpec {
                id: NodeId::new(id),
                capacity: None,
                peers: (0..size)
                    .filter(|&peer| peer != id)
                    .map(|peer| Peer::new(peer, rng.gen_range(1..=1000)))
                    .collect(),
            })
            .collect();
        Self { nodes }
    }

    /// Check ids, capacities and that peer knowledge is symmetric
    pub fn validate(&self, default_capacity: usize) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(config_error!("topology has no nodes"));
        }

        let mut known: BTreeMap<NodeId, BTreeSet<NodeId>> = BTreeMap::new();
        for spec in &self.nodes {
            if spec.capacity.unwrap_or(default_capacity) == 0 {
                return Err(config_error!("node {} has RC capacity 0", spec.id));
            }
            let mut peers = BTreeSet::new();
            for peer in &spec.peers {
                if peer.id == spec.id {
                    return Err(config_error!("node {} lists itself as a peer", spec.id));
                }
                if !peers.insert(peer.id) {
                    return Err(config_error!(
                        "node {} lists peer {} more than once",
                        spec.id,
                        peer.id
                    ));
                }
            }
            if known.insert(spec.id, peers).is_some() {
                return Err(config_error!("duplicate node id {}", spec.id));
            }
        }

        for (id, peers) in &known {
            for peer in peers {
                match known.get(peer) {
                    None => {
                        return Err(config_error!(
                            "node {} knows peer {} which is not in the topology",
                            id,
                            peer
                        ))
                    }
                    Some(back) if !back.contains(id) => {
                        return Err(config_error!(
                            "node {} knows peer {} but not the other way round",
                            id,
                            peer
                        ))
                    }
                    Some(_) => {}
                }
            }
        }
        Ok(())
    }

    /// Validated nodes, every peer starting in DC
    pub fn build_nodes(&self, default_capacity: usize, margin: u64) -> Result<Vec<Node>> {
        self.validate(default_capacity)?;
        Ok(self
            .nodes
            .iter()
            .map(|spec| {
                Node::new(spec.id, spec.capacity.unwrap_or(default_capacity))
                    .with_margin(margin)
                    .with_peers(spec.peers.iter().copied())
            })
            .collect())
    }

    pub fn build_graph(&self, default_capacity: usize, margin: u64) -> Result<Graph> {
        Graph::new(self.build_nodes(default_capacity, margin)?)
    }
}
