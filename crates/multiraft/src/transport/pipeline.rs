//! Non-blocking pipelined message transport

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use super::credit::InflightTracker;
use crate::config::TransportConfig;
use crate::error::{ConsensusResult, Error};
use crate::foundation::{ConsensusGroupId, Message, NodeId};
use crate::metrics::MetricsRegistry;

/// Drop reason label for exhausted credit
pub const DROP_NO_CREDIT: &str = "no_credit";
/// Drop reason label for a full peer queue
pub const DROP_QUEUE_FULL: &str = "queue_full";

/// What happened to a message handed to [`PipelineTransport::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The message is on the peer's queue
    Queued,
    /// The peer had no credit left
    DroppedNoCredit,
    /// The peer's queue was full
    DroppedQueueFull,
}

impl SendOutcome {
    /// Whether the message was dropped under backpressure
    pub fn is_dropped(&self) -> bool {
        !matches!(self, SendOutcome::Queued)
    }
}

/// Tally of one [`PipelineTransport::pipeline`] call
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PipelineReport {
    /// Messages queued
    pub queued: usize,
    /// Messages dropped under backpressure
    pub dropped: usize,
}

/// Bounded FIFO towards one peer
struct PeerStream {
    sender: flume::Sender<Message>,
    receiver: flume::Receiver<Message>,
    /// Serializes producers against purges and teardown; `true` once
    /// the stream has been disconnected
    gate: Mutex<bool>,
}

impl PeerStream {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = flume::bounded(capacity);
        Self {
            sender,
            receiver,
            gate: Mutex::new(false),
        }
    }
}

/// Sends protocol messages to peers without ever waiting
///
/// Every message needs one unit of the destination's credit and a free
/// slot on its bounded queue. When either is missing the message is
/// dropped and the call still succeeds; consensus protocols already
/// tolerate loss. The network side reads a peer's queue through
/// [`PipelineTransport::receive`] and calls [`PipelineTransport::release`]
/// once a message has actually been transmitted.
pub struct PipelineTransport {
    config: TransportConfig,
    streams: DashMap<NodeId, Arc<PeerStream>>,
    inflight: InflightTracker,
    metrics: Arc<MetricsRegistry>,
    /// Held while a peer stream is created or torn down
    connect_lock: Mutex<()>,
    closed: AtomicBool,
}

impl PipelineTransport {
    /// Create a new pipelined transport
    pub fn new(config: TransportConfig, metrics: Arc<MetricsRegistry>) -> ConsensusResult<Self> {
        config.validate()?;
        let inflight = InflightTracker::new(config.inflight_limit)?;
        Ok(Self {
            config,
            streams: DashMap::new(),
            inflight,
            metrics,
            connect_lock: Mutex::new(()),
            closed: AtomicBool::new(false),
        })
    }

    /// Transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Create the peer's queue if it does not exist yet
    pub fn connect(&self, peer: NodeId) -> ConsensusResult<()> {
        self.stream(peer).map(|_| ())
    }

    fn stream(&self, peer: NodeId) -> ConsensusResult<Arc<PeerStream>> {
        if self.closed.load(Ordering::Acquire) {
            self.metrics.transport.setup_errors_total.inc();
            return Err(Error::transport_setup(format!(
                "transport is closed, cannot reach {peer}"
            )));
        }

        if let Some(stream) = self.streams.get(&peer) {
            return Ok(stream.clone());
        }

        let _connecting = self.connect_lock.lock();
        if let Some(stream) = self.streams.get(&peer) {
            return Ok(stream.clone());
        }

        if let Some(max_peers) = self.config.max_peers
            && self.streams.len() >= max_peers
        {
            self.metrics.transport.setup_errors_total.inc();
            return Err(Error::transport_setup(format!(
                "cannot connect to {peer}: peer limit of {max_peers} reached"
            )));
        }

        let stream = Arc::new(PeerStream::new(self.config.queue_capacity));
        self.streams.insert(peer, stream.clone());
        self.metrics.transport.connected_peers.inc();
        debug!(%peer, capacity = self.config.queue_capacity, "Opened peer stream");
        Ok(stream)
    }

    /// Queue a message for its destination without blocking
    ///
    /// Backpressure drops are reported through [`SendOutcome`], not as
    /// errors. Only failing to set up the peer stream is an error.
    pub fn send(&self, message: Message) -> ConsensusResult<SendOutcome> {
        let mut message = message;
        loop {
            let stream = self.stream(message.to)?;
            match self.enqueue(&stream, message) {
                Ok(outcome) => return Ok(outcome),
                // Disconnected between lookup and enqueue; reconnect
                Err(returned) => message = returned,
            }
        }
    }

    /// Take credit and a queue slot on one stream
    ///
    /// Credit is only touched under the stream's gate, so it can never be
    /// taken against a stream that `disconnect` already tore down. Such a
    /// stream hands the message back untouched.
    fn enqueue(&self, stream: &PeerStream, message: Message) -> Result<SendOutcome, Message> {
        let peer = message.to;
        let torn_down = stream.gate.lock();
        if *torn_down {
            return Err(message);
        }

        if !self.inflight.acquire(peer) {
            self.metrics.transport.record_drop(DROP_NO_CREDIT);
            debug!(%peer, group_id = %message.group_id, "No credit for peer, dropping message");
            return Ok(SendOutcome::DroppedNoCredit);
        }

        match stream.sender.try_send(message) {
            Ok(()) => {
                self.metrics.transport.messages_queued_total.inc();
                Ok(SendOutcome::Queued)
            }
            // The stream owns a receiver, so the only failure is a full queue
            Err(full) => {
                self.inflight.release(peer);
                self.metrics.transport.record_drop(DROP_QUEUE_FULL);
                debug!(
                    %peer,
                    group_id = %full.into_inner().group_id,
                    "Peer queue full, dropping message"
                );
                Ok(SendOutcome::DroppedQueueFull)
            }
        }
    }

    /// Send messages in order, stopping at the first hard error
    pub fn pipeline(
        &self,
        messages: impl IntoIterator<Item = Message>,
    ) -> ConsensusResult<PipelineReport> {
        let mut report = PipelineReport::default();
        for message in messages {
            if self.send(message)?.is_dropped() {
                report.dropped += 1;
            } else {
                report.queued += 1;
            }
        }
        Ok(report)
    }

    /// Read end of a peer's queue, for the network dispatcher
    pub fn receive(&self, peer: NodeId) -> Option<flume::Receiver<Message>> {
        self.streams
            .get(&peer)
            .map(|stream| stream.receiver.clone())
    }

    /// Return one unit of credit after a confirmed transmission
    pub fn release(&self, peer: NodeId) {
        self.inflight.release(peer);
    }

    /// Return all credit held for a peer
    pub fn release_all(&self, peer: NodeId) -> usize {
        self.inflight.release_all(peer)
    }

    /// Tear down a peer's queue and drain its credit
    ///
    /// Returns the number of queued messages that were discarded. A
    /// replacement stream for the peer can only be opened once the old
    /// stream's credit is gone.
    pub fn disconnect(&self, peer: NodeId) -> usize {
        let _connecting = self.connect_lock.lock();
        let Some((_, stream)) = self.streams.remove(&peer) else {
            return 0;
        };
        self.metrics.transport.connected_peers.dec();

        let (discarded, released) = {
            let mut torn_down = stream.gate.lock();
            *torn_down = true;
            (stream.receiver.drain().count(), self.inflight.forget(peer))
        };
        info!(%peer, discarded, released, "Disconnected peer");
        discarded
    }

    /// Drop every queued message that belongs to a group
    ///
    /// Messages of other groups keep their relative order. Credit held by
    /// the purged messages is returned. Messages the dispatcher already
    /// took off the queue are not affected.
    pub fn purge_group(&self, group_id: ConsensusGroupId) -> usize {
        let streams: Vec<(NodeId, Arc<PeerStream>)> = self
            .streams
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();

        let mut purged = 0;
        for (peer, stream) in streams {
            let torn_down = stream.gate.lock();
            if *torn_down {
                continue;
            }
            let pending: Vec<Message> = stream.receiver.drain().collect();
            for message in pending {
                if message.group_id == group_id {
                    self.inflight.release(peer);
                    purged += 1;
                } else if stream.sender.try_send(message).is_err() {
                    // Unreachable while the gate is held: the drain above freed the capacity
                    self.inflight.release(peer);
                }
            }
        }

        if purged > 0 {
            self.metrics.transport.purged_messages_total.inc_by(purged as u64);
            debug!(%group_id, purged, "Purged queued messages of removed group");
        }
        purged
    }

    /// Messages waiting on a peer's queue
    pub fn queue_len(&self, peer: NodeId) -> usize {
        self.streams
            .get(&peer)
            .map(|stream| stream.sender.len())
            .unwrap_or(0)
    }

    /// Credit held for a peer
    pub fn inflight(&self, peer: NodeId) -> usize {
        self.inflight.inflight(peer)
    }

    /// Whether a peer has an open queue
    pub fn is_connected(&self, peer: NodeId) -> bool {
        self.streams.contains_key(&peer)
    }

    /// Peers with an open queue, ordered
    pub fn peers(&self) -> Vec<NodeId> {
        let mut peers: Vec<_> = self.streams.iter().map(|entry| *entry.key()).collect();
        peers.sort();
        peers
    }

    /// Refuse new peer streams; existing queues stay readable
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            warn!(peers = self.streams.len(), "Pipeline transport closed");
        }
    }
}

impl fmt::Debug for PipelineTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTransport")
            .field("config", &self.config)
            .field("peers", &self.streams.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
