//! Draining peer queues onto the network

use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::pipeline::PipelineTransport;
use crate::error::{ConsensusResult, Error};
use crate::foundation::{Message, NodeId};

/// The network side of one peer connection
#[async_trait]
pub trait PeerSink: Send + Sync + 'static {
    /// Hand a message to the network, returning once it has left this node
    async fn transmit(&self, message: Message) -> ConsensusResult<()>;
}

#[async_trait]
impl<T: PeerSink> PeerSink for Arc<T> {
    async fn transmit(&self, message: Message) -> ConsensusResult<()> {
        (**self).transmit(message).await
    }
}

/// Counters of a finished dispatcher
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchStats {
    /// Messages confirmed by the sink
    pub transmitted: usize,
}

/// Moves one peer's queued messages to its sink
///
/// Credit comes back one unit per confirmed transmission. A failed
/// transmission disconnects the peer: its queue is discarded together
/// with its credit and the dispatcher stops with the error. The next send
/// to the peer opens a fresh stream for a replacement dispatcher.
pub struct PeerDispatcher<K>
where
    K: PeerSink,
{
    transport: Arc<PipelineTransport>,
    peer: NodeId,
    sink: K,
}

impl<K> PeerDispatcher<K>
where
    K: PeerSink,
{
    /// Create a dispatcher for a peer
    pub fn new(transport: Arc<PipelineTransport>, peer: NodeId, sink: K) -> Self {
        Self {
            transport,
            peer,
            sink,
        }
    }

    /// Run on a background task
    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<ConsensusResult<DispatchStats>> {
        tokio::spawn(self.run(cancel))
    }

    /// Drain the peer's queue until cancelled or the stream goes away
    pub async fn run(self, cancel: CancellationToken) -> ConsensusResult<DispatchStats> {
        let peer = self.peer;
        self.transport.connect(peer)?;
        let receiver = self
            .transport
            .receive(peer)
            .ok_or_else(|| Error::not_found(format!("no stream for {peer}")))?;

        let mut stats = DispatchStats::default();
        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%peer, transmitted = stats.transmitted, "Dispatcher cancelled");
                    break;
                }
                received = receiver.recv_async() => match received {
                    Ok(message) => message,
                    Err(_) => {
                        debug!(%peer, "Peer stream closed");
                        break;
                    }
                },
            };

            match self.sink.transmit(message).await {
                Ok(()) => {
                    self.transport.release(peer);
                    stats.transmitted += 1;
                }
                Err(e) => {
                    let discarded = self.transport.disconnect(peer);
                    warn!(%peer, discarded, "Transmission failed, disconnecting peer: {}", e);
                    return Err(e);
                }
            }
        }

        Ok(stats)
    }
}
