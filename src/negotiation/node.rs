//! Per-node RC/DC negotiation state machine
//!
//! A node knows a fixed set of peers. Each known peer is either in the RC list
//! (holding one of the node's `capacity` RC slots) or in the DC list. The DC
//! list is everything known that is not RC, so the two lists are disjoint and
//! cover the known-peer set by construction.
//!
//! The RC list is an [`IndexedMinHeap`] keyed by the stored score so the
//! weakest RC peer can be found and evicted in O(log A).
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::messages::{Message, MessageKind, NodeId, Score};
use crate::error::{ProtocolViolation, RcdcError, Result};
use crate::heap::IndexedMinHeap;
use crate::{config_error, protocol_error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: NodeId,
    pub score: Score,
}

impl Peer {
    pub fn new(id: impl Into<NodeId>, score: Score) -> Self {
        Self {
            id: id.into(),
            score,
        }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.id, self.score)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct NodeStats {
    pub messages_handled: u64,
    pub acks_sent: u64,
    pub demotes_sent: u64,
    pub repromotes_sent: u64,
    pub rejections: u64,
}

/// Serializable view of a node for reports
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub capacity: usize,
    pub rc: Vec<Peer>,
    pub dc: Vec<Peer>,
    pub stats: NodeStats,
}

#[derive(Clone, Debug)]
pub struct Node {
    id: NodeId,
    capacity: usize,
    // Promote admission requires beating the RC minimum by more than this
    margin: Score,
    peers: BTreeMap<NodeId, Score>,
    rc: IndexedMinHeap<NodeId>,
    stats: NodeStats,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, capacity: usize) -> Self {
        Self {
            id: id.into(),
            capacity,
            margin: 0,
            peers: BTreeMap::new(),
            rc: IndexedMinHeap::with_capacity(capacity),
            stats: NodeStats::default(),
        }
    }

    pub fn with_margin(mut self, margin: Score) -> Self {
        self.margin = margin;
        self
    }

    /// Add peers to the DC list
    pub fn with_peers(mut self, peers: impl IntoIterator<Item = Peer>) -> Self {
        for peer in peers {
            self.add_peer(peer.id, peer.score);
        }
        self
    }

    /// Build a node with an explicit initial RC/DC split
    pub fn from_lists(
        id: impl Into<NodeId>,
        capacity: usize,
        dc: impl IntoIterator<Item = Peer>,
        rc: impl IntoIterator<Item = Peer>,
    ) -> Result<Self> {
        let mut node = Self::new(id, capacity).with_peers(dc);
        for peer in rc {
            if node.peers.contains_key(&peer.id) {
                return Err(config_error!(
                    "node {}: peer {} listed in both RC and DC",
                    node.id,
                    peer.id
                ));
            }
            node.peers.insert(peer.id, peer.score);
            node.rc.push(peer.id, peer.score);
        }
        node.check_invariants()?;
        Ok(node)
    }

    /// Register a peer in DC. Re-adding a known peer only overwrites its score.
    pub fn add_peer(&mut self, peer: impl Into<NodeId>, score: Score) {
        let peer = peer.into();
        self.set_score(peer, score);
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn margin(&self) -> Score {
        self.margin
    }

    pub fn rc_avail(&self) -> usize {
        self.capacity.saturating_sub(self.rc.len())
    }

    pub fn rc_len(&self) -> usize {
        self.rc.len()
    }

    pub fn is_rc(&self, peer: &NodeId) -> bool {
        self.rc.contains(peer)
    }

    pub fn knows(&self, peer: &NodeId) -> bool {
        self.peers.contains_key(peer)
    }

    pub fn score(&self, peer: &NodeId) -> Option<Score> {
        self.peers.get(peer).copied()
    }

    pub fn known_peers(&self) -> Vec<NodeId> {
        self.peers.keys().copied().collect()
    }

    /// RC peers by score descending
    pub fn rc_peers(&self) -> Vec<Peer> {
        sort_peers(
            self.rc
                .iter()
                .map(|(&id, score)| Peer { id, score })
                .collect(),
        )
    }

    /// DC peers by score descending
    pub fn dc_peers(&self) -> Vec<Peer> {
        sort_peers(
            self.peers
                .iter()
                .filter(|(id, _)| !self.rc.contains(id))
                .map(|(&id, &score)| Peer { id, score })
                .collect(),
        )
    }

    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            id: self.id,
            capacity: self.capacity,
            rc: self.rc_peers(),
            dc: self.dc_peers(),
            stats: self.stats.clone(),
        }
    }

    /// Refresh a peer's score from local traffic observations between rounds
    pub fn update_score(&mut self, peer: NodeId, score: Score) -> Result<()> {
        if !self.knows(&peer) {
            return Err(config_error!("node {} has no peer {}", self.id, peer));
        }
        self.set_score(peer, score);
        Ok(())
    }

    /// Promote requests for this round: the best-scoring non-RC peers, as many
    /// as there are free RC slots. Does not change any state, so calling it
    /// twice yields the same messages.
    pub fn promote(&self) -> Vec<Message> {
        self.promote_top(self.rc_avail())
    }

    fn promote_top(&self, count: usize) -> Vec<Message> {
        let candidates = self.dc_peers();
        candidates
            .into_iter()
            .take(count.min(self.capacity))
            .map(|peer| {
                debug!(
                    "[Node<{}>] sending promotion request to node {}",
                    self.id, peer.id
                );
                Message::promote(self.id, peer.id, peer.score)
            })
            .collect()
    }

    /// Apply one incoming message and return the messages it produces.
    pub fn handle(&mut self, msg: Message) -> Result<Vec<Message>> {
        if msg.dest != self.id {
            return Err(protocol_error!(
                self.id,
                ProtocolViolation::UnknownDestination { dest: msg.dest }
            ));
        }
        let out = match msg.kind {
            MessageKind::Promote => self.handle_promote(msg)?,
            MessageKind::Demote => self.handle_demote(msg)?,
            MessageKind::Ack => self.handle_ack(msg)?,
        };
        self.stats.messages_handled += 1;
        for sent in &out {
            match sent.kind {
                MessageKind::Promote => self.stats.repromotes_sent += 1,
                MessageKind::Demote => self.stats.demotes_sent += 1,
                MessageKind::Ack => self.stats.acks_sent += 1,
            }
        }
        Ok(out)
    }

    fn handle_promote(&mut self, msg: Message) -> Result<Vec<Message>> {
        debug!(
            "[Node<{}>] received promotion request from node {} (score {})",
            self.id, msg.src, msg.score
        );
        let stored = self.peers.get(&msg.src).copied().ok_or_else(|| {
            protocol_error!(
                self.id,
                ProtocolViolation::UnknownPeer {
                    kind: MessageKind::Promote,
                    peer: msg.src,
                }
            )
        })?;
        let score = stored.max(msg.score);
        self.set_score(msg.src, score);

        if self.rc.contains(&msg.src) {
            // crossing request: the sender has not seen our Ack yet
            debug!(
                "[Node<{}>] node {} already RC, re-sending ack",
                self.id, msg.src
            );
            return Ok(vec![Message::ack(self.id, msg.src, score)]);
        }

        if self.rc_avail() > 0 {
            self.rc.push(msg.src, score);
            debug!("[Node<{}>] node {} DC -> RC", self.id, msg.src);
            return Ok(vec![Message::ack(self.id, msg.src, score)]);
        }

        let (min_peer, min_score) = match self.rc.peek_min() {
            Some((&peer, score)) => (peer, score),
            None => {
                self.stats.rejections += 1;
                debug!(
                    "[Node<{}>] request from node {} denied: no RC capacity",
                    self.id, msg.src
                );
                return Ok(Vec::new());
            }
        };

        if score > min_score.saturating_add(self.margin) {
            // evict first so the RC list never exceeds capacity
            self.rc.pop_min();
            self.rc.push(msg.src, score);
            debug!(
                "[Node<{}>] node {} DC -> RC, evicting node {} ({} > {})",
                self.id, msg.src, min_peer, score, min_score
            );
            Ok(vec![
                Message::ack(self.id, msg.src, score),
                Message::demote(self.id, min_peer, min_score),
            ])
        } else {
            self.stats.rejections += 1;
            debug!(
                "[Node<{}>] request denied: {} does not beat RC minimum {} (node {})",
                self.id,
                Peer::new(msg.src, score),
                min_score,
                min_peer
            );
            Ok(Vec::new())
        }
    }

    fn handle_demote(&mut self, msg: Message) -> Result<Vec<Message>> {
        debug!(
            "[Node<{}>] received demotion request from node {}",
            self.id, msg.src
        );
        if self.rc.remove(&msg.src).is_none() {
            return Err(protocol_error!(
                self.id,
                ProtocolViolation::NotInRc { peer: msg.src }
            ));
        }
        debug!("[Node<{}>] node {} RC -> DC", self.id, msg.src);

        // the freed slot goes to the best DC candidate
        Ok(self.promote_top(1))
    }

    fn handle_ack(&mut self, msg: Message) -> Result<Vec<Message>> {
        debug!("[Node<{}>] received ack from node {}", self.id, msg.src);
        let stored = self.peers.get(&msg.src).copied().ok_or_else(|| {
            protocol_error!(
                self.id,
                ProtocolViolation::UnknownPeer {
                    kind: MessageKind::Ack,
                    peer: msg.src,
                }
            )
        })?;
        let score = stored.max(msg.score);
        self.set_score(msg.src, score);

        if self.rc.contains(&msg.src) {
            return Ok(Vec::new());
        }

        let mut out = Vec::new();
        if self.rc_avail() == 0 {
            match self.rc.pop_min() {
                Some((min_peer, min_score)) => {
                    debug!(
                        "[Node<{}>] RC full on ack, evicting node {} (score {})",
                        self.id, min_peer, min_score
                    );
                    out.push(Message::demote(self.id, min_peer, min_score));
                }
                None => {
                    warn!(
                        "[Node<{}>] ack from node {} ignored: node has no RC capacity",
                        self.id, msg.src
                    );
                    return Ok(out);
                }
            }
        }
        self.rc.push(msg.src, score);
        debug!("[Node<{}>] node {} DC -> RC", self.id, msg.src);
        Ok(out)
    }

    /// Capacity and partition invariants; checked by the drivers after every
    /// delivered message.
    pub fn check_invariants(&self) -> Result<()> {
        if self.rc.len() > self.capacity {
            return Err(RcdcError::CapacityBreach {
                node: self.id,
                rc_len: self.rc.len(),
                capacity: self.capacity,
            });
        }
        debug_assert!(self.rc.keys().all(|peer| self.peers.contains_key(peer)));
        Ok(())
    }

    fn set_score(&mut self, peer: NodeId, score: Score) {
        self.peers.insert(peer, score);
        self.rc.update(&peer, score);
    }
}

// score descending, then id ascending
fn sort_peers(mut peers: Vec<Peer>) -> Vec<Peer> {
    peers.sort_by(|a, b| b.score.cmp(&a.score).then(a.id.cmp(&b.id)));
    peers
}
