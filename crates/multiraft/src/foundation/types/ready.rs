//! Per-tick output of a consensus group

use bytes::Bytes;

use super::ids::{ConsensusGroupId, NodeId};
use super::message::Message;

/// Output of one `advance` call for one group
///
/// Produced fresh each tick and consumed once by the coordinator. The
/// entries are persisted before any of the messages are handed to the
/// transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ready {
    /// Group that produced this record
    pub group_id: ConsensusGroupId,
    /// Log entries to persist, in order
    pub entries: Vec<Bytes>,
    /// Messages to send once the entries are durable, in order
    pub messages: Vec<Message>,
    /// Whether the group has anything to persist or send this tick
    pub updated: bool,
    /// Leader currently known to the group, if any
    pub leader: Option<NodeId>,
}

impl Ready {
    /// A record with nothing to do
    pub fn empty(group_id: ConsensusGroupId) -> Self {
        Self {
            group_id,
            entries: Vec::new(),
            messages: Vec::new(),
            updated: false,
            leader: None,
        }
    }

    /// A record that is marked updated when it carries entries or messages
    pub fn new(group_id: ConsensusGroupId, entries: Vec<Bytes>, messages: Vec<Message>) -> Self {
        let updated = !entries.is_empty() || !messages.is_empty();
        Self {
            group_id,
            entries,
            messages,
            updated,
            leader: None,
        }
    }

    /// Attach a leader hint
    pub fn with_leader(mut self, leader: NodeId) -> Self {
        self.leader = Some(leader);
        self
    }

    /// Whether the record should take part in this tick's batch
    pub fn has_updates(&self) -> bool {
        self.updated
    }
}
