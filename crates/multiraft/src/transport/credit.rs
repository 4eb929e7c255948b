//! Per-peer in-flight credit

use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;

use crate::error::{ConsensusResult, Error};
use crate::foundation::NodeId;

/// Bounded per-peer counter of messages in flight
///
/// `acquire` never blocks: it either takes a unit of credit or reports
/// that the peer is at its limit. Counters stay within `[0, limit]` under
/// any interleaving of callers.
#[derive(Debug)]
pub struct InflightTracker {
    pending: DashMap<NodeId, AtomicUsize>,
    limit: usize,
}

impl InflightTracker {
    /// Create a tracker allowing `limit` in-flight messages per peer
    pub fn new(limit: usize) -> ConsensusResult<Self> {
        if limit == 0 {
            return Err(Error::configuration("inflight limit must be greater than zero"));
        }
        Ok(Self {
            pending: DashMap::new(),
            limit,
        })
    }

    /// Per-peer limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Take one unit of credit for a peer, or return `false` at the limit
    pub fn acquire(&self, peer: NodeId) -> bool {
        if let Some(counter) = self.pending.get(&peer) {
            return self.try_increment(&counter);
        }

        let counter = self.pending.entry(peer).or_default();
        self.try_increment(&counter)
    }

    fn try_increment(&self, counter: &AtomicUsize) -> bool {
        let limit = self.limit;
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < limit).then_some(current + 1)
            })
            .is_ok()
    }

    /// Return one unit of credit; releasing at zero is a no-op
    pub fn release(&self, peer: NodeId) {
        if let Some(counter) = self.pending.get(&peer) {
            let _ = counter.fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        }
    }

    /// Return all outstanding credit for a peer, yielding how much was held
    pub fn release_all(&self, peer: NodeId) -> usize {
        self.pending
            .get(&peer)
            .map(|counter| counter.swap(0, Ordering::AcqRel))
            .unwrap_or(0)
    }

    /// Credit currently held for a peer
    pub fn inflight(&self, peer: NodeId) -> usize {
        self.pending
            .get(&peer)
            .map(|counter| counter.load(Ordering::Acquire))
            .unwrap_or(0)
    }

    /// Stop tracking a peer entirely
    pub fn forget(&self, peer: NodeId) -> usize {
        self.pending
            .remove(&peer)
            .map(|(_, counter)| counter.into_inner())
            .unwrap_or(0)
    }
}
