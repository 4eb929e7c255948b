//! Outbound protocol messages

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{ConsensusGroupId, NodeId};

/// Kind of protocol message carried by a [`Message`]
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Vote request
    Vote,
    /// Vote response
    VoteResponse,
    /// Log replication request
    AppendEntries,
    /// Log replication response
    AppendEntriesResponse,
    /// Leader heartbeat
    Heartbeat,
    /// Heartbeat response
    HeartbeatResponse,
    /// Snapshot transfer
    InstallSnapshot,
    /// Anything a consensus implementation defines on its own
    Other(String),
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Vote => write!(f, "vote"),
            MessageType::VoteResponse => write!(f, "vote_response"),
            MessageType::AppendEntries => write!(f, "append_entries"),
            MessageType::AppendEntriesResponse => write!(f, "append_entries_response"),
            MessageType::Heartbeat => write!(f, "heartbeat"),
            MessageType::HeartbeatResponse => write!(f, "heartbeat_response"),
            MessageType::InstallSnapshot => write!(f, "install_snapshot"),
            MessageType::Other(tag) => write!(f, "{tag}"),
        }
    }
}

/// A protocol message from one node to another on behalf of a group
///
/// Messages are never persisted; they live only until the peer dispatcher
/// hands them to the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Sending node
    pub from: NodeId,
    /// Destination node
    pub to: NodeId,
    /// Group the message belongs to
    pub group_id: ConsensusGroupId,
    /// Message type tag
    pub message_type: MessageType,
    /// Opaque protocol payload
    pub payload: Bytes,
}

impl Message {
    /// Create a new message
    pub fn new(
        from: NodeId,
        to: NodeId,
        group_id: ConsensusGroupId,
        message_type: MessageType,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            from,
            to,
            group_id,
            message_type,
            payload: payload.into(),
        }
    }
}
