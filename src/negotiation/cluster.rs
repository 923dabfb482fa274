//! Concurrent round driver
//!
//! Every node runs in its own tokio task and owns its state; it consumes its
//! own inbox one command at a time. The `Cluster` is the sequencer: it owns
//! the [`MessageBus`] and delivers one message at a time, waiting for the
//! destination's reply before delivering the next. Delivery order is thus one
//! total order and a round ends in exactly the state `Graph` would reach.
//!
//! `Cluster::start` moves the sequencer into a background task that runs
//! rounds on a [`RoundTrigger`] and answers [`ClusterCommand`]s sent through a
//! [`ClusterHandle`].
use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info};

use super::bus::MessageBus;
use super::graph::RoundReport;
use super::messages::{Message, NodeId, Score};
use super::node::{Node, NodeSnapshot};
use super::{RoundDriver, RunSummary};
use crate::error::{ProtocolViolation, RcdcError, Result};
use crate::settings::{RoundTrigger, DEFAULT_MAX_MESSAGES_PER_ROUND};
use crate::{concurrency_error, config_error, protocol_error};

const NODE_INBOX_SIZE: usize = 64;
const CLUSTER_INBOX_SIZE: usize = 64;

/// Commands handled by a single node task
#[derive(Debug)]
pub enum NodeCommand {
    /// Collect this round's Promote requests
    Promote {
        resp_chan: oneshot::Sender<Vec<Message>>,
    },
    /// Apply one message and return what it produced
    Deliver {
        msg: Message,
        resp_chan: oneshot::Sender<Result<Vec<Message>>>,
    },
    UpdateScore {
        peer: NodeId,
        score: Score,
        resp_chan: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        resp_chan: oneshot::Sender<NodeSnapshot>,
    },
}

/// Commands accepted by a started cluster
#[derive(Debug)]
pub enum ClusterCommand {
    RunRound {
        resp_chan: oneshot::Sender<Result<RoundReport>>,
    },
    Deliver {
        messages: Vec<Message>,
        resp_chan: oneshot::Sender<Result<RoundReport>>,
    },
    UpdateScore {
        node: NodeId,
        peer: NodeId,
        score: Score,
        resp_chan: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        resp_chan: oneshot::Sender<Result<Vec<NodeSnapshot>>>,
    },
}

async fn run_node(mut node: Node, mut inbox: mpsc::Receiver<NodeCommand>) {
    let node_id = node.id();
    debug!("[Node<{}>] task started", node_id);
    while let Some(cmd) = inbox.recv().await {
        match cmd {
            NodeCommand::Promote { resp_chan } => {
                if resp_chan.send(node.promote()).is_err() {
                    error!("[Node<{}>] Failed sending oneshot promote response", node_id);
                }
            }
            NodeCommand::Deliver { msg, resp_chan } => {
                let result = node
                    .handle(msg)
                    .and_then(|out| node.check_invariants().map(|_| out));
                let fatal = result.is_err();
                if resp_chan.send(result).is_err() {
                    error!("[Node<{}>] Failed sending oneshot deliver response", node_id);
                }
                if fatal {
                    // state may have diverged; stop handling anything else
                    error!("[Node<{}>] aborting message processing", node_id);
                    break;
                }
            }
            NodeCommand::UpdateScore {
                peer,
                score,
                resp_chan,
            } => {
                if resp_chan.send(node.update_score(peer, score)).is_err() {
                    error!("[Node<{}>] Failed sending oneshot score response", node_id);
                }
            }
            NodeCommand::Snapshot { resp_chan } => {
                if resp_chan.send(node.snapshot()).is_err() {
                    error!("[Node<{}>] Failed sending oneshot snapshot response", node_id);
                }
            }
        }
    }
    debug!("[Node<{}>] task stopped", node_id);
}

#[derive(Debug)]
pub struct Cluster {
    inboxes: BTreeMap<NodeId, mpsc::Sender<NodeCommand>>,
    tasks: Vec<JoinHandle<()>>,
    bus: MessageBus,
    max_messages_per_round: usize,
    round: u64,
}

impl Cluster {
    /// Spawn one task per node. Must be called from within a tokio runtime.
    pub fn spawn(nodes: impl IntoIterator<Item = Node>) -> Result<Self> {
        let mut inboxes = BTreeMap::new();
        let mut tasks = Vec::new();
        for node in nodes {
            let id = node.id();
            if inboxes.contains_key(&id) {
                return Err(config_error!("duplicate node id {}", id));
            }
            let (tx, rx) = mpsc::channel(NODE_INBOX_SIZE);
            inboxes.insert(id, tx);
            tasks.push(tokio::spawn(run_node(node, rx)));
        }
        info!("[Cluster] spawned {} node tasks", inboxes.len());
        Ok(Self {
            inboxes,
            tasks,
            bus: MessageBus::new(),
            max_messages_per_round: DEFAULT_MAX_MESSAGES_PER_ROUND,
            round: 0,
        })
    }

    pub fn with_message_limit(mut self, limit: usize) -> Self {
        self.max_messages_per_round = limit;
        self
    }

    pub fn len(&self) -> usize {
        self.inboxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inboxes.is_empty()
    }

    pub fn rounds(&self) -> u64 {
        self.round
    }

    async fn request<T>(
        &self,
        node: NodeId,
        cmd: impl FnOnce(oneshot::Sender<T>) -> NodeCommand,
    ) -> Result<T> {
        let inbox = self
            .inboxes
            .get(&node)
            .ok_or_else(|| config_error!("no node {} in cluster", node))?;
        let (resp_tx, resp_rx) = oneshot::channel();
        inbox
            .send(cmd(resp_tx))
            .await
            .map_err(|_| concurrency_error!("node {} task is not running", node))?;
        resp_rx
            .await
            .map_err(|_| concurrency_error!("node {} dropped its response channel", node))
    }

    pub async fn run_round(&mut self) -> Result<RoundReport> {
        self.round += 1;

        // nodes compute their requests concurrently; collection stays in id order
        let mut pending = Vec::with_capacity(self.inboxes.len());
        for (&id, inbox) in &self.inboxes {
            let (resp_tx, resp_rx) = oneshot::channel();
            inbox
                .send(NodeCommand::Promote { resp_chan: resp_tx })
                .await
                .map_err(|_| concurrency_error!("node {} task is not running", id))?;
            pending.push((id, resp_rx));
        }
        for (id, resp_rx) in pending {
            let requests = resp_rx
                .await
                .map_err(|_| concurrency_error!("node {} dropped its response channel", id))?;
            self.bus.extend(requests);
        }

        let report = self.drain().await?;
        info!("[Cluster] {}", report);
        Ok(report)
    }

    pub async fn deliver(&mut self, messages: Vec<Message>) -> Result<RoundReport> {
        self.bus.extend(messages);
        self.drain().await
    }

    async fn drain(&mut self) -> Result<RoundReport> {
        let mut report = RoundReport::new(self.round);
        while let Some(msg) = self.bus.pop() {
            if let Err(e) = self.deliver_one(&mut report, msg).await {
                let dropped = self.bus.clear();
                error!(
                    "[Cluster] round {} aborted after {} messages ({} dropped): {}",
                    self.round, report.delivered, dropped, e
                );
                return Err(e);
            }
        }
        Ok(report)
    }

    async fn deliver_one(&mut self, report: &mut RoundReport, msg: Message) -> Result<()> {
        if report.delivered >= self.max_messages_per_round {
            return Err(RcdcError::RoundLimit {
                round: self.round,
                delivered: report.delivered,
            });
        }
        report.record(&msg);
        if !self.inboxes.contains_key(&msg.dest) {
            return Err(protocol_error!(
                msg.src,
                ProtocolViolation::UnknownDestination { dest: msg.dest }
            ));
        }
        debug!("[Cluster] delivering {}", msg);
        let out = self
            .request(msg.dest, |resp_chan| NodeCommand::Deliver { msg, resp_chan })
            .await??;
        self.bus.extend(out);
        Ok(())
    }

    pub async fn update_score(&mut self, node: NodeId, peer: NodeId, score: Score) -> Result<()> {
        self.request(node, |resp_chan| NodeCommand::UpdateScore {
            peer,
            score,
            resp_chan,
        })
        .await?
    }

    pub async fn snapshot(&mut self) -> Result<Vec<NodeSnapshot>> {
        let ids: Vec<NodeId> = self.inboxes.keys().copied().collect();
        let mut snapshots = Vec::with_capacity(ids.len());
        for id in ids {
            snapshots.push(
                self.request(id, |resp_chan| NodeCommand::Snapshot { resp_chan })
                    .await?,
            );
        }
        Ok(snapshots)
    }

    /// Close every node inbox and wait for the tasks to finish
    pub async fn shutdown(self) -> Result<()> {
        drop(self.inboxes);
        for task in self.tasks {
            task.await
                .map_err(|e| concurrency_error!("node task failed: {}", e))?;
        }
        Ok(())
    }

    /// Move the sequencer into a background task driven by `trigger`.
    /// The task stops after `max_rounds` rounds (if set), when every handle
    /// is dropped, or on the first failed round. On a clean stop it returns
    /// the round reports and the final node states.
    pub fn start(
        self,
        trigger: RoundTrigger,
        max_rounds: Option<u64>,
    ) -> (ClusterHandle, JoinHandle<Result<RunSummary>>) {
        let (tx, rx) = mpsc::channel(CLUSTER_INBOX_SIZE);
        let task = tokio::spawn(self.serve(trigger, max_rounds, rx));
        (ClusterHandle { tx }, task)
    }

    async fn serve(
        mut self,
        trigger: RoundTrigger,
        max_rounds: Option<u64>,
        mut commands: mpsc::Receiver<ClusterCommand>,
    ) -> Result<RunSummary> {
        info!("[Cluster] serving with round trigger {}", trigger);
        let mut timer = match trigger {
            RoundTrigger::Interval(ms) => Some(time::interval(time::Duration::from_millis(ms))),
            _ => None,
        };
        let mut score_updates = 0u64;
        let mut reports = Vec::new();

        loop {
            if max_rounds.map_or(false, |max| self.round >= max) {
                info!("[Cluster] reached {} rounds, stopping", self.round);
                break;
            }
            tokio::select! {
                cmd = commands.recv() => {
                    let Some(cmd) = cmd else {
                        info!("[Cluster] command channel closed, exiting");
                        break;
                    };
                    match cmd {
                        ClusterCommand::RunRound { resp_chan } => {
                            let result = self.run_round().await;
                            if let Ok(report) = &result {
                                reports.push(report.clone());
                            }
                            let outcome = failed_command("round", &result);
                            if resp_chan.send(result).is_err() {
                                error!("[Cluster] Failed sending oneshot round response");
                            }
                            outcome?;
                        }
                        ClusterCommand::Deliver { messages, resp_chan } => {
                            let result = self.deliver(messages).await;
                            let outcome = failed_command("scripted delivery", &result);
                            if resp_chan.send(result).is_err() {
                                error!("[Cluster] Failed sending oneshot deliver response");
                            }
                            outcome?;
                        }
                        ClusterCommand::UpdateScore { node, peer, score, resp_chan } => {
                            let result = self.update_score(node, peer, score).await;
                            let accepted = result.is_ok();
                            if resp_chan.send(result).is_err() {
                                error!("[Cluster] Failed sending oneshot score response");
                            }
                            match trigger {
                                RoundTrigger::ScoreUpdates(threshold) if accepted => {
                                    score_updates += 1;
                                    if score_updates >= threshold {
                                        score_updates = 0;
                                        reports.push(self.run_round().await?);
                                    }
                                }
                                _ => {}
                            }
                        }
                        ClusterCommand::Snapshot { resp_chan } => {
                            if resp_chan.send(self.snapshot().await).is_err() {
                                error!("[Cluster] Failed sending oneshot snapshot response");
                            }
                        }
                    }
                }
                _ = tick(&mut timer) => {
                    reports.push(self.run_round().await?);
                }
            }
        }

        let nodes = self.snapshot().await?;
        self.shutdown().await?;
        Ok(RunSummary {
            rounds: reports,
            nodes,
        })
    }
}

// The caller already got the real error; the serve loop stops with a summary.
fn failed_command<T>(what: &str, result: &Result<T>) -> Result<()> {
    match result {
        Ok(_) => Ok(()),
        Err(e) => Err(concurrency_error!("{} failed: {}", what, e)),
    }
}

async fn tick(timer: &mut Option<time::Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Client side of a started cluster
#[derive(Clone, Debug)]
pub struct ClusterHandle {
    tx: mpsc::Sender<ClusterCommand>,
}

impl ClusterHandle {
    async fn request<T>(
        &self,
        cmd: impl FnOnce(oneshot::Sender<Result<T>>) -> ClusterCommand,
    ) -> Result<T> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx
            .send(cmd(resp_tx))
            .await
            .map_err(|_| concurrency_error!("cluster is not running"))?;
        resp_rx
            .await
            .map_err(|_| concurrency_error!("cluster dropped its response channel"))?
    }

    pub async fn run_round(&self) -> Result<RoundReport> {
        self.request(|resp_chan| ClusterCommand::RunRound { resp_chan })
            .await
    }

    pub async fn deliver(&self, messages: Vec<Message>) -> Result<RoundReport> {
        self.request(|resp_chan| ClusterCommand::Deliver {
            messages,
            resp_chan,
        })
        .await
    }

    pub async fn update_score(&self, node: NodeId, peer: NodeId, score: Score) -> Result<()> {
        self.request(|resp_chan| ClusterCommand::UpdateScore {
            node,
            peer,
            score,
            resp_chan,
        })
        .await
    }

    pub async fn snapshot(&self) -> Result<Vec<NodeSnapshot>> {
        self.request(|resp_chan| ClusterCommand::Snapshot { resp_chan })
            .await
    }
}

#[async_trait]
impl RoundDriver for Cluster {
    async fn run_round(&mut self) -> Result<RoundReport> {
        Cluster::run_round(self).await
    }

    async fn deliver(&mut self, messages: Vec<Message>) -> Result<RoundReport> {
        Cluster::deliver(self, messages).await
    }

    async fn update_score(&mut self, node: NodeId, peer: NodeId, score: Score) -> Result<()> {
        Cluster::update_score(self, node, peer, score).await
    }

    async fn snapshot(&mut self) -> Result<Vec<NodeSnapshot>> {
        Cluster::snapshot(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::negotiation::node::Peer;
    use crate::negotiation::topology::Topology;

    #[tokio::test]
    async fn test_cluster_matches_graph_on_demo() {
        let topology = Topology::demo();
        let mut graph = topology.build_graph(1, 0).unwrap();
        let mut cluster = Cluster::spawn(topology.build_nodes(1, 0).unwrap()).unwrap();

        let expected = graph.run_round().unwrap();
        let report = cluster.run_round().await.unwrap();

        assert_eq!(report, expected);
        assert_eq!(cluster.snapshot().await.unwrap(), graph.snapshot());
        cluster.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_fatal_violation_stops_node_task() {
        let mut cluster = Cluster::spawn([
            Node::new(0, 1).with_peers([Peer::new(1, 1)]),
            Node::new(1, 1).with_peers([Peer::new(0, 1)]),
        ])
        .unwrap();

        let err = cluster
            .deliver(vec![Message::demote(NodeId::new(1), NodeId::new(0), 1)])
            .await
            .unwrap_err();
        assert!(err.is_fatal_protocol_error());

        // node 0 no longer takes commands
        let err = cluster
            .update_score(NodeId::new(0), NodeId::new(1), 5)
            .await
            .unwrap_err();
        assert!(matches!(err, RcdcError::Concurrency(_)));
    }

    #[tokio::test]
    async fn test_started_cluster_manual_trigger() {
        let cluster = Cluster::spawn(Topology::demo().build_nodes(1, 0).unwrap()).unwrap();
        let (handle, task) = cluster.start(RoundTrigger::Manual, None);

        let report = handle.run_round().await.unwrap();
        assert_eq!(report.round, 1);
        let snapshots = handle.snapshot().await.unwrap();
        assert_eq!(snapshots.len(), 3);

        drop(handle);
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.rounds, vec![report]);
        assert_eq!(summary.nodes, snapshots);
    }

    #[tokio::test]
    async fn test_started_cluster_score_update_trigger() {
        let cluster = Cluster::spawn(Topology::demo().build_nodes(1, 0).unwrap()).unwrap();
        let (handle, task) = cluster.start(RoundTrigger::ScoreUpdates(2), Some(1));

        handle
            .update_score(NodeId::new(1), NodeId::new(0), 900)
            .await
            .unwrap();
        handle
            .update_score(NodeId::new(0), NodeId::new(1), 900)
            .await
            .unwrap();

        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.rounds.len(), 1);
        assert!(summary.rounds[0].delivered > 0);
        // the boosted pair hold each other; node 2's request is rejected
        assert!(summary.asymmetric_pairs().is_empty());
        let node0 = &summary.nodes[0];
        assert_eq!(node0.rc, vec![Peer::new(1, 900)]);
    }

    #[tokio::test]
    async fn test_started_cluster_interval_trigger() {
        let cluster = Cluster::spawn(Topology::demo().build_nodes(1, 0).unwrap()).unwrap();
        let (handle, task) = cluster.start(RoundTrigger::Interval(5), Some(3));

        let summary = task.await.unwrap().unwrap();
        let reports = summary.rounds;
        assert_eq!(reports.len(), 3);
        // after the first round only node 1's rejected request is left
        assert_eq!(reports[2].delivered, 1);
        assert_eq!(reports[2].promotes, 1);
        drop(handle);
    }
}
