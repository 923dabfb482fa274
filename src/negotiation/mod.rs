//! Decentralized RC/DC negotiation: per-node Promote/Demote/Ack state machines
//! exchanging messages over one ordered channel.
use async_trait::async_trait;
use serde::Serialize;

pub mod bus;
pub mod cluster;
pub mod graph;
pub mod messages;
pub mod node;
pub mod topology;

use crate::error::Result;
pub use bus::MessageBus;
pub use cluster::{Cluster, ClusterHandle};
pub use graph::{asymmetric_pairs, Graph, RoundReport};
pub use messages::{Message, MessageKind, NodeId, Score};
pub use node::{Node, NodeSnapshot, NodeStats, Peer};
pub use topology::Topology;

/// Round reports and final node states of one negotiation run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub rounds: Vec<RoundReport>,
    pub nodes: Vec<NodeSnapshot>,
}

impl RunSummary {
    pub fn asymmetric_pairs(&self) -> Vec<(NodeId, NodeId)> {
        asymmetric_pairs(&self.nodes)
    }

    pub fn messages_delivered(&self) -> usize {
        self.rounds.iter().map(|r| r.delivered).sum()
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for report in &self.rounds {
            writeln!(f, "{}", report)?;
        }
        let list = |peers: &[Peer]| {
            peers
                .iter()
                .map(Peer::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        for node in &self.nodes {
            writeln!(
                f,
                "node {}: RC [{}] DC [{}]",
                node.id,
                list(&node.rc),
                list(&node.dc)
            )?;
        }
        write!(f, "{} messages delivered", self.messages_delivered())
    }
}

/// Something that can run negotiation rounds over a set of nodes
#[async_trait]
pub trait RoundDriver: Send {
    /// Every node promotes, then the message queue is drained
    async fn run_round(&mut self) -> Result<RoundReport>;
    /// Deliver externally produced messages (and their cascades)
    async fn deliver(&mut self, messages: Vec<Message>) -> Result<RoundReport>;
    async fn update_score(&mut self, node: NodeId, peer: NodeId, score: Score) -> Result<()>;
    async fn snapshot(&mut self) -> Result<Vec<NodeSnapshot>>;

    /// Run `rounds` rounds, then deliver `script` if it is not empty
    async fn run(&mut self, rounds: u64, script: Vec<Message>) -> Result<RunSummary> {
        let mut reports = Vec::new();
        for _ in 0..rounds {
            reports.push(self.run_round().await?);
        }
        if !script.is_empty() {
            reports.push(self.deliver(script).await?);
        }
        Ok(RunSummary {
            rounds: reports,
            nodes: self.snapshot().await?,
        })
    }
}

#[async_trait]
impl RoundDriver for Graph {
    async fn run_round(&mut self) -> Result<RoundReport> {
        Graph::run_round(self)
    }

    async fn deliver(&mut self, messages: Vec<Message>) -> Result<RoundReport> {
        for msg in messages {
            self.inject(msg);
        }
        self.drain()
    }

    async fn update_score(&mut self, node: NodeId, peer: NodeId, score: Score) -> Result<()> {
        Graph::update_score(self, node, peer, score)
    }

    async fn snapshot(&mut self) -> Result<Vec<NodeSnapshot>> {
        Ok(Graph::snapshot(self))
    }
}
