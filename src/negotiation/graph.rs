//! Sequential round driver
//!
//! `Graph` owns every node and the shared [`MessageBus`]. A round asks each
//! node (in id order) for its Promote requests, then drains the bus one
//! message at a time; any messages produced while handling are appended to
//! the tail and handled in the same round.
use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info};

use super::bus::MessageBus;
use super::messages::{Message, MessageKind, NodeId, Score};
use super::node::{Node, NodeSnapshot};
use crate::config_error;
use crate::error::{ProtocolViolation, RcdcError, Result};
use crate::protocol_error;
use crate::settings::DEFAULT_MAX_MESSAGES_PER_ROUND;

/// Counters for one drained round
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RoundReport {
    pub round: u64,
    pub delivered: usize,
    pub promotes: usize,
    pub demotes: usize,
    pub acks: usize,
}

impl RoundReport {
    pub fn new(round: u64) -> Self {
        Self {
            round,
            ..Default::default()
        }
    }

    pub fn record(&mut self, msg: &Message) {
        self.delivered += 1;
        match msg.kind {
            MessageKind::Promote => self.promotes += 1,
            MessageKind::Demote => self.demotes += 1,
            MessageKind::Ack => self.acks += 1,
        }
    }
}

impl std::fmt::Display for RoundReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "round {}: {} messages ({} promote, {} ack, {} demote)",
            self.round, self.delivered, self.promotes, self.acks, self.demotes
        )
    }
}

#[derive(Debug)]
pub struct Graph {
    nodes: BTreeMap<NodeId, Node>,
    bus: MessageBus,
    max_messages_per_round: usize,
    round: u64,
}

impl Graph {
    pub fn new(nodes: impl IntoIterator<Item = Node>) -> Result<Self> {
        let mut by_id = BTreeMap::new();
        for node in nodes {
            let id = node.id();
            if by_id.insert(id, node).is_some() {
                return Err(config_error!("duplicate node id {}", id));
            }
        }
        Ok(Self {
            nodes: by_id,
            bus: MessageBus::new(),
            max_messages_per_round: DEFAULT_MAX_MESSAGES_PER_ROUND,
            round: 0,
        })
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.max_messages_per_round = limit;
        self
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Rounds started so far
    pub fn rounds(&self) -> u64 {
        self.round
    }

    pub fn pending(&self) -> usize {
        self.bus.len()
    }

    /// Queue a message for delivery in the next drain
    pub fn inject(&mut self, msg: Message) {
        self.bus.push(msg);
    }

    pub fn update_score(&mut self, node: NodeId, peer: NodeId, score: Score) -> Result<()> {
        self.nodes
            .get_mut(&node)
            .ok_or_else(|| config_error!("no node {} in graph", node))?
            .update_score(peer, score)
    }

    /// One full negotiation round: every node promotes, then the bus is
    /// drained to empty.
    pub fn run_round(&mut self) -> Result<RoundReport> {
        self.round += 1;
        for node in self.nodes.values() {
            self.bus.extend(node.promote());
        }
        let report = self.drain()?;
        info!("[Graph] {}", report);
        Ok(report)
    }

    /// Deliver whatever is pending without asking nodes to promote.
    pub fn drain(&mut self) -> Result<RoundReport> {
        let mut report = RoundReport::new(self.round);
        while let Some(msg) = self.bus.pop() {
            if let Err(e) = self.deliver(&mut report, msg) {
                let dropped = self.bus.clear();
                error!(
                    "[Graph] round {} aborted after {} messages ({} dropped): {}",
                    self.round, report.delivered, dropped, e
                );
                return Err(e);
            }
        }
        Ok(report)
    }

    fn deliver(&mut self, report: &mut RoundReport, msg: Message) -> Result<()> {
        if report.delivered >= self.max_messages_per_round {
            return Err(RcdcError::RoundLimit {
                round: self.round,
                delivered: report.delivered,
            });
        }
        report.record(&msg);
        debug!("[Graph] delivering {}", msg);

        let node = self.nodes.get_mut(&msg.dest).ok_or_else(|| {
            protocol_error!(
                msg.src,
                ProtocolViolation::UnknownDestination { dest: msg.dest }
            )
        })?;
        let out = node.handle(msg)?;
        node.check_invariants()?;
        self.bus.extend(out);
        Ok(())
    }

    pub fn snapshot(&self) -> Vec<NodeSnapshot> {
        self.nodes.values().map(Node::snapshot).collect()
    }

    /// Pairs `(a, b)` where `a` holds `b` in RC but `b` does not hold `a`
    pub fn asymmetric_pairs(&self) -> Vec<(NodeId, NodeId)> {
        asymmetric_pairs(&self.snapshot())
    }
}

pub fn asymmetric_pairs(snapshots: &[NodeSnapshot]) -> Vec<(NodeId, NodeId)> {
    let holds = |a: NodeId, b: NodeId| {
        snapshots
            .iter()
            .find(|s| s.id == a)
            .map(|s| s.rc.iter().any(|p| p.id == b))
            .unwrap_or(false)
    };
    let mut pairs = Vec::new();
    for snap in snapshots {
        for peer in &snap.rc {
            if !holds(peer.id, snap.id) {
                pairs.push((snap.id, peer.id));
            }
        }
    }
    pairs
}
