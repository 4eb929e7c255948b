//! Registry of consensus groups driven by the tick coordinator

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use crate::error::{ConsensusResult, Error};
use crate::foundation::{ConsensusGroupId, GroupStateMachine, NodeId, Ready};

/// Shared handle to one registered group
///
/// The state machine sits behind an async mutex. An advance that was
/// abandoned by a tick timeout keeps the lock until it finishes, and a
/// later tick gets [`crate::error::ErrorKind::Busy`] instead of running
/// the machine concurrently with itself.
#[derive(Clone)]
pub struct GroupHandle {
    inner: Arc<GroupEntry>,
}

struct GroupEntry {
    group_id: ConsensusGroupId,
    machine: tokio::sync::Mutex<Box<dyn GroupStateMachine>>,
    leader: RwLock<Option<NodeId>>,
}

impl GroupHandle {
    fn new(group_id: ConsensusGroupId, machine: Box<dyn GroupStateMachine>) -> Self {
        Self {
            inner: Arc::new(GroupEntry {
                group_id,
                machine: tokio::sync::Mutex::new(machine),
                leader: RwLock::new(None),
            }),
        }
    }

    /// Group this handle refers to
    pub fn group_id(&self) -> ConsensusGroupId {
        self.inner.group_id
    }

    /// Last leader hint reported by the group
    pub fn leader(&self) -> Option<NodeId> {
        *self.inner.leader.read()
    }

    /// Record a leader hint
    pub fn set_leader(&self, leader: Option<NodeId>) {
        *self.inner.leader.write() = leader;
    }

    /// Advance the group's state machine by one tick
    pub async fn advance(&self) -> ConsensusResult<Ready> {
        let group_id = self.inner.group_id;
        let mut machine = self
            .inner
            .machine
            .try_lock()
            .map_err(|_| Error::busy(group_id))?;
        machine.advance(group_id).await
    }
}

impl fmt::Debug for GroupHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GroupHandle")
            .field("group_id", &self.inner.group_id)
            .field("leader", &self.leader())
            .finish()
    }
}

/// Thread-safe collection of consensus groups
///
/// Snapshots are taken under a read lock; additions and removals take the
/// write lock. Adding a group that is already registered is a no-op and
/// keeps the existing state machine.
#[derive(Default)]
pub struct GroupRegistry {
    groups: RwLock<HashMap<ConsensusGroupId, GroupHandle>>,
}

impl GroupRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a group, returning `false` if the id was already taken
    pub fn add_group<M>(&self, group_id: ConsensusGroupId, machine: M) -> bool
    where
        M: GroupStateMachine,
    {
        let mut groups = self.groups.write();
        if groups.contains_key(&group_id) {
            debug!(%group_id, "Group already registered, keeping existing state machine");
            return false;
        }
        groups.insert(group_id, GroupHandle::new(group_id, Box::new(machine)));
        debug!(%group_id, "Registered group");
        true
    }

    /// Detach a group
    ///
    /// Only the registry entry goes away. Messages the group already queued
    /// stay on the transport; use `TickCoordinator::remove_group` to purge
    /// them as well.
    pub fn remove_group(&self, group_id: ConsensusGroupId) -> Option<GroupHandle> {
        let removed = self.groups.write().remove(&group_id);
        if removed.is_some() {
            debug!(%group_id, "Removed group");
        }
        removed
    }

    /// Look up a group
    pub fn get(&self, group_id: ConsensusGroupId) -> Option<GroupHandle> {
        self.groups.read().get(&group_id).cloned()
    }

    /// Whether a group is registered
    pub fn contains(&self, group_id: ConsensusGroupId) -> bool {
        self.groups.read().contains_key(&group_id)
    }

    /// Groups registered right now, ordered by id
    pub fn snapshot(&self) -> Vec<GroupHandle> {
        let mut handles: Vec<_> = self.groups.read().values().cloned().collect();
        handles.sort_by_key(GroupHandle::group_id);
        handles
    }

    /// Ids of the registered groups, ordered
    pub fn group_ids(&self) -> Vec<ConsensusGroupId> {
        let mut ids: Vec<_> = self.groups.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Number of registered groups
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Whether no group is registered
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use bytes::Bytes;
    use std::time::Duration;

    struct Counter {
        ticks: u64,
    }

    #[async_trait]
    impl GroupStateMachine for Counter {
        async fn advance(&mut self, group_id: ConsensusGroupId) -> ConsensusResult<Ready> {
            self.ticks += 1;
            Ok(Ready::new(
                group_id,
                vec![Bytes::from(self.ticks.to_string())],
                vec![],
            ))
        }
    }

    struct Sleeper;

    #[async_trait]
    impl GroupStateMachine for Sleeper {
        async fn advance(&mut self, group_id: ConsensusGroupId) -> ConsensusResult<Ready> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Ready::empty(group_id))
        }
    }

    #[tokio::test]
    async fn test_add_existing_group_is_noop() {
        let registry = GroupRegistry::new();
        let id = ConsensusGroupId::new(1);

        assert!(registry.add_group(id, Counter { ticks: 0 }));
        let first = registry.get(id).unwrap().advance().await.unwrap();
        assert_eq!(first.entries, vec![Bytes::from("1")]);

        // The second add must not reset the machine
        assert!(!registry.add_group(id, Counter { ticks: 100 }));
        let second = registry.get(id).unwrap().advance().await.unwrap();
        assert_eq!(second.entries, vec![Bytes::from("2")]);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_snapshot_is_point_in_time() {
        let registry = GroupRegistry::new();
        registry.add_group(ConsensusGroupId::new(2), Counter { ticks: 0 });
        registry.add_group(ConsensusGroupId::new(1), Counter { ticks: 0 });

        let snapshot = registry.snapshot();
        registry.add_group(ConsensusGroupId::new(3), Counter { ticks: 0 });
        registry.remove_group(ConsensusGroupId::new(1));

        let ids: Vec<_> = snapshot.iter().map(GroupHandle::group_id).collect();
        assert_eq!(ids, vec![ConsensusGroupId::new(1), ConsensusGroupId::new(2)]);
        assert_eq!(
            registry.group_ids(),
            vec![ConsensusGroupId::new(2), ConsensusGroupId::new(3)]
        );
    }

    #[test]
    fn test_remove_missing_group() {
        let registry = GroupRegistry::new();
        assert!(registry.remove_group(ConsensusGroupId::new(9)).is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_advance_is_never_reentrant() {
        let registry = GroupRegistry::new();
        let id = ConsensusGroupId::new(4);
        registry.add_group(id, Sleeper);
        let handle = registry.get(id).unwrap();

        let running = {
            let handle = handle.clone();
            tokio::spawn(async move { handle.advance().await })
        };
        tokio::task::yield_now().await;

        let err = handle.advance().await.unwrap_err();
        assert_eq!(err.kind(), &crate::error::ErrorKind::Busy);
        assert_eq!(err.group_id(), Some(id));

        running.abort();
    }

    #[test]
    fn test_leader_hint() {
        let registry = GroupRegistry::new();
        let id = ConsensusGroupId::new(5);
        registry.add_group(id, Counter { ticks: 0 });

        let handle = registry.get(id).unwrap();
        assert_eq!(handle.leader(), None);
        handle.set_leader(Some(NodeId::new(3)));
        assert_eq!(registry.get(id).unwrap().leader(), Some(NodeId::new(3)));
    }
}
