//! Negotiation messages
//!
//! Messages are in-process values: created by a node's outgoing action, moved
//! through the [`MessageBus`](super::bus::MessageBus) and consumed exactly once
//! by the destination node. Scripted messages can be loaded from JSON; their
//! `kind` is parsed with [`MessageKind::from_str`].
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ProtocolViolation, RcdcError};

/// Converging, bidirectional estimate of mutual importance between two peers
pub type Score = u64;

/// Unique identifier for negotiating nodes
#[derive(
    Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, PartialOrd, Ord, Eq, Hash,
)]
pub struct NodeId(u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        NodeId::new(id)
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKind {
    /// Ask the destination to hold the sender in its RC list
    Promote,
    /// Tell the destination that the sender moved it to DC
    Demote,
    /// Confirm that a Promote from the destination was accepted
    Ack,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MessageKind::Promote => write!(f, "Promote"),
            MessageKind::Demote => write!(f, "Demote"),
            MessageKind::Ack => write!(f, "Ack"),
        }
    }
}

impl FromStr for MessageKind {
    type Err = ProtocolViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "promote" => Ok(MessageKind::Promote),
            "demote" => Ok(MessageKind::Demote),
            "ack" => Ok(MessageKind::Ack),
            _ => Err(ProtocolViolation::UnknownKind(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Message {
    pub src: NodeId,
    pub dest: NodeId,
    pub score: Score,
    pub kind: MessageKind,
}

impl Message {
    pub fn new(src: NodeId, dest: NodeId, score: Score, kind: MessageKind) -> Self {
        Self {
            src,
            dest,
            score,
            kind,
        }
    }

    pub fn promote(src: NodeId, dest: NodeId, score: Score) -> Self {
        Self::new(src, dest, score, MessageKind::Promote)
    }

    pub fn demote(src: NodeId, dest: NodeId, score: Score) -> Self {
        Self::new(src, dest, score, MessageKind::Demote)
    }

    pub fn ack(src: NodeId, dest: NodeId, score: Score) -> Self {
        Self::new(src, dest, score, MessageKind::Ack)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({} -> {}, score={})",
            self.kind, self.src, self.dest, self.score
        )
    }
}

/// Message as written in a script file. The kind stays a string until the
/// script is applied so that a misspelled kind surfaces as a protocol error.
#[derive(Clone, Debug, Deserialize)]
pub struct ScriptedMessage {
    pub src: u32,
    pub dest: u32,
    pub score: Score,
    pub kind: String,
}

impl ScriptedMessage {
    /// Parse the kind. An unknown kind is reported against the destination,
    /// which is the node that would have had to handle it.
    pub fn into_message(self) -> Result<Message, RcdcError> {
        let dest = NodeId::new(self.dest);
        let kind = self
            .kind
            .parse::<MessageKind>()
            .map_err(|violation| crate::protocol_error!(dest, violation))?;
        Ok(Message::new(NodeId::new(self.src), dest, self.score, kind))
    }
}

/// Load a JSON array of scripted messages
pub fn parse_script(data: &str) -> Result<Vec<Message>, RcdcError> {
    let scripted: Vec<ScriptedMessage> = serde_json::from_str(data)?;
    scripted.into_iter().map(ScriptedMessage::into_message).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_from_str() {
        assert_eq!("Promote".parse::<MessageKind>(), Ok(MessageKind::Promote));
        assert_eq!("demote".parse::<MessageKind>(), Ok(MessageKind::Demote));
        assert_eq!("ACK".parse::<MessageKind>(), Ok(MessageKind::Ack));
        assert_eq!(
            "Nack".parse::<MessageKind>(),
            Err(ProtocolViolation::UnknownKind("Nack".to_string()))
        );
    }

    #[test]
    fn test_message_display() {
        let msg = Message::ack(NodeId::new(1), NodeId::new(2), 150);
        assert_eq!(msg.to_string(), "Ack(1 -> 2, score=150)");
    }

    #[test]
    fn test_parse_script() {
        let data = r#"[
            {"src": 2, "dest": 0, "score": 150, "kind": "Promote"},
            {"src": 0, "dest": 1, "score": 100, "kind": "demote"}
        ]"#;
        let messages = parse_script(data).unwrap();
        assert_eq!(
            messages,
            vec![
                Message::promote(NodeId::new(2), NodeId::new(0), 150),
                Message::demote(NodeId::new(0), NodeId::new(1), 100),
            ]
        );
    }

    #[test]
    fn test_parse_script_unknown_kind_is_protocol_violation() {
        let data = r#"[{"src": 2, "dest": 0, "score": 150, "kind": "Upgrade"}]"#;
        match parse_script(data) {
            Err(RcdcError::Protocol { node, violation }) => {
                assert_eq!(node, NodeId::new(0));
                assert_eq!(violation, ProtocolViolation::UnknownKind("Upgrade".into()));
            }
            other => panic!("expected protocol violation, got {:?}", other),
        }
    }
}
