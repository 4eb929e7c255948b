//! Scripted state machines and batch writers

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use proven_multiraft::{
    BatchWriter, ConsensusGroupId, ConsensusResult, Error, GroupRegistry, GroupStateMachine,
    Message, MessageType, NodeId, PipelineTransport, Ready,
};

/// Local node id used as the sender in every test message
pub const LOCAL: NodeId = NodeId::new(0);

/// Group that replays the same output on every advance
pub struct ScriptedGroup {
    entries: Vec<Bytes>,
    peers: Vec<NodeId>,
    delay: Duration,
    advances: Arc<AtomicUsize>,
}

impl ScriptedGroup {
    /// A group that never has updates
    pub fn idle() -> Self {
        Self {
            entries: Vec::new(),
            peers: Vec::new(),
            delay: Duration::ZERO,
            advances: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A group that appends one entry and messages each peer once
    pub fn updating(peers: &[u64]) -> Self {
        Self {
            entries: vec![Bytes::from_static(b"entry")],
            peers: peers.iter().copied().map(NodeId::new).collect(),
            ..Self::idle()
        }
    }

    /// Sleep before producing output
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Counter of completed and started advances
    pub fn advances(&self) -> Arc<AtomicUsize> {
        self.advances.clone()
    }
}

#[async_trait]
impl GroupStateMachine for ScriptedGroup {
    async fn advance(&mut self, group_id: ConsensusGroupId) -> ConsensusResult<Ready> {
        let round = self.advances.fetch_add(1, Ordering::SeqCst) + 1;
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let messages = self
            .peers
            .iter()
            .map(|&peer| {
                Message::new(
                    LOCAL,
                    peer,
                    group_id,
                    MessageType::AppendEntries,
                    format!("{group_id} round {round}"),
                )
            })
            .collect();
        Ok(Ready::new(group_id, self.entries.clone(), messages))
    }
}

/// Group that runs a side effect against the registry when advanced
pub struct HookGroup<F>
where
    F: Fn(&GroupRegistry) + Send + Sync + 'static,
{
    registry: Arc<GroupRegistry>,
    hook: F,
}

impl<F> HookGroup<F>
where
    F: Fn(&GroupRegistry) + Send + Sync + 'static,
{
    /// Create a hook group
    pub fn new(registry: Arc<GroupRegistry>, hook: F) -> Self {
        Self { registry, hook }
    }
}

#[async_trait]
impl<F> GroupStateMachine for HookGroup<F>
where
    F: Fn(&GroupRegistry) + Send + Sync + 'static,
{
    async fn advance(&mut self, group_id: ConsensusGroupId) -> ConsensusResult<Ready> {
        (self.hook)(&self.registry);
        Ok(Ready::new(
            group_id,
            vec![Bytes::from_static(b"hook")],
            vec![],
        ))
    }
}

/// Group whose advance step always fails
pub struct FailingGroup;

#[async_trait]
impl GroupStateMachine for FailingGroup {
    async fn advance(&mut self, group_id: ConsensusGroupId) -> ConsensusResult<Ready> {
        Err(Error::consensus(group_id, "log mismatch"))
    }
}

/// What a [`RecordingWriter`] saw on one call
#[derive(Debug, Clone)]
pub struct PersistCall {
    /// Groups in the batch, in batch order
    pub groups: Vec<ConsensusGroupId>,
    /// Messages already queued on the observed transport when the call started
    pub queued_before: usize,
}

/// Writer that records every batch and can be told to fail
#[derive(Default)]
pub struct RecordingWriter {
    calls: Mutex<Vec<PersistCall>>,
    transport: Mutex<Option<Arc<PipelineTransport>>>,
    fail: std::sync::atomic::AtomicBool,
}

impl RecordingWriter {
    /// Writer that fails every batch
    pub fn failing() -> Self {
        let writer = Self::default();
        writer.set_failing(true);
        writer
    }

    /// Toggle failure
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Count queued messages on this transport at every persist call
    pub fn observe(&self, transport: Arc<PipelineTransport>) {
        *self.transport.lock() = Some(transport);
    }

    /// Calls seen so far
    pub fn calls(&self) -> Vec<PersistCall> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl BatchWriter for RecordingWriter {
    async fn persist_batch(&self, batch: &[Ready]) -> ConsensusResult<()> {
        let queued_before = self
            .transport
            .lock()
            .as_ref()
            .map(|transport| {
                transport
                    .peers()
                    .into_iter()
                    .map(|peer| transport.queue_len(peer))
                    .sum()
            })
            .unwrap_or(0);

        self.calls.lock().push(PersistCall {
            groups: batch.iter().map(|ready| ready.group_id).collect(),
            queued_before,
        });

        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::persist("disk unavailable"));
        }
        Ok(())
    }
}
