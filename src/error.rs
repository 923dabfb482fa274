use std::fmt;

use crate::negotiation::messages::{MessageKind, NodeId};

/// Main error type for the rcdc scheduler and negotiation drivers
#[derive(Debug)]
pub enum RcdcError {
    /// Configuration, CLI argument or topology setup errors
    Config(String),

    /// Fatal negotiation protocol violation observed by a node
    Protocol {
        node: NodeId,
        violation: ProtocolViolation,
    },

    /// A node's RC list grew beyond its capacity. Always an implementation bug.
    CapacityBreach {
        node: NodeId,
        rc_len: usize,
        capacity: usize,
    },

    /// A round delivered more messages than the configured safety limit
    RoundLimit { round: u64, delivered: usize },

    /// System I/O errors
    Io(std::io::Error),

    /// JSON serialization/deserialization errors
    Serialization(serde_json::Error),

    /// Node task or channel errors in the concurrent driver
    Concurrency(String),
}

/// Negotiation protocol violations. Each of these means that topology setup
/// or an earlier protocol step is broken; none of them is retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolViolation {
    /// Promote or Ack from a peer the node has never heard of
    UnknownPeer { kind: MessageKind, peer: NodeId },

    /// Demote from a peer that is not in the node's RC list
    NotInRc { peer: NodeId },

    /// Message addressed to a node that is not part of the graph, or handed
    /// to a node it is not addressed to
    UnknownDestination { dest: NodeId },

    /// Message kind that does not name Promote, Demote or Ack
    UnknownKind(String),
}

impl fmt::Display for RcdcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RcdcError::Config(msg) => write!(f, "Configuration error: {}", msg),
            RcdcError::Protocol { node, violation } => {
                write!(f, "Protocol violation at node {}: {}", node, violation)
            }
            RcdcError::CapacityBreach {
                node,
                rc_len,
                capacity,
            } => write!(
                f,
                "Capacity breach at node {}: {} RC peers with capacity {}",
                node, rc_len, capacity
            ),
            RcdcError::RoundLimit { round, delivered } => write!(
                f,
                "Round {} did not settle after {} delivered messages",
                round, delivered
            ),
            RcdcError::Io(err) => write!(f, "I/O error: {}", err),
            RcdcError::Serialization(err) => write!(f, "Serialization error: {}", err),
            RcdcError::Concurrency(msg) => write!(f, "Concurrency error: {}", msg),
        }
    }
}

impl fmt::Display for ProtocolViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolViolation::UnknownPeer { kind, peer } => {
                write!(f, "{} from unknown peer {}", kind, peer)
            }
            ProtocolViolation::NotInRc { peer } => {
                write!(f, "Demote from peer {} which is not in RC", peer)
            }
            ProtocolViolation::UnknownDestination { dest } => {
                write!(f, "message addressed to unknown node {}", dest)
            }
            ProtocolViolation::UnknownKind(kind) => write!(f, "unknown message kind '{}'", kind),
        }
    }
}

impl std::error::Error for RcdcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RcdcError::Io(err) => Some(err),
            RcdcError::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl std::error::Error for ProtocolViolation {}

// Convenient type alias for Results using our error type
pub type Result<T> = std::result::Result<T, RcdcError>;

impl RcdcError {
    /// True for errors that indicate a broken protocol implementation or setup
    pub fn is_fatal_protocol_error(&self) -> bool {
        matches!(
            self,
            RcdcError::Protocol { .. } | RcdcError::CapacityBreach { .. }
        )
    }

    /// Get the error type identifier
    pub fn error_type(&self) -> &'static str {
        match self {
            RcdcError::Config(_) => "configuration_error",
            RcdcError::Protocol { .. } => "protocol_violation",
            RcdcError::CapacityBreach { .. } => "capacity_breach",
            RcdcError::RoundLimit { .. } => "round_limit",
            RcdcError::Io(_) => "io_error",
            RcdcError::Serialization(_) => "serialization_error",
            RcdcError::Concurrency(_) => "concurrency_error",
        }
    }
}

// Conversions from common error types
impl From<std::io::Error> for RcdcError {
    fn from(err: std::io::Error) -> Self {
        RcdcError::Io(err)
    }
}

impl From<serde_json::Error> for RcdcError {
    fn from(err: serde_json::Error) -> Self {
        RcdcError::Serialization(err)
    }
}

impl From<String> for RcdcError {
    fn from(err: String) -> Self {
        RcdcError::Config(err)
    }
}

// Helper macros for common error construction patterns
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::RcdcError::Config($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RcdcError::Config(format!($fmt, $($arg)*))
    };
}

#[macro_export]
macro_rules! protocol_error {
    ($node:expr, $violation:expr) => {
        $crate::error::RcdcError::Protocol {
            node: $node,
            violation: $violation,
        }
    };
}

#[macro_export]
macro_rules! concurrency_error {
    ($msg:expr) => {
        $crate::error::RcdcError::Concurrency($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::RcdcError::Concurrency(format!($fmt, $($arg)*))
    };
}
