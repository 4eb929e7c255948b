//! Tick coordinator
//!
//! One tick fans out an advance step per registered group, waits for all
//! of them up to the tick timeout, persists the updated records as one
//! batch and only then hands the records' messages to the transport.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::batch::BatchWriter;
use crate::config::CoordinatorConfig;
use crate::error::{ConsensusResult, Error, ErrorKind};
use crate::foundation::{ConsensusGroupId, GroupStateMachine, Ready};
use crate::metrics::MetricsRegistry;
use crate::registry::{GroupHandle, GroupRegistry};
use crate::transport::PipelineTransport;

/// Coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    /// Waiting for the next tick
    Idle,
    /// A tick is running
    Ticking,
}

/// Outcome of one successful tick
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TickReport {
    /// Groups in the tick's snapshot
    pub groups_ticked: usize,
    /// Groups whose records were persisted and disseminated, ordered
    pub updated_groups: Vec<ConsensusGroupId>,
    /// Groups whose advance step missed the deadline, ordered
    pub timed_out: Vec<ConsensusGroupId>,
    /// Groups whose advance step failed or panicked, ordered
    pub failed: Vec<ConsensusGroupId>,
    /// Groups skipped because an earlier advance was still running, ordered
    pub busy: Vec<ConsensusGroupId>,
    /// Records dropped because their group was removed during the tick
    pub discarded: usize,
    /// Messages placed on peer queues
    pub messages_queued: usize,
    /// Messages dropped under backpressure
    pub messages_dropped: usize,
    /// Groups whose dissemination stopped on a hard transport error
    pub transport_errors: usize,
}

type AdvanceOutcome = (ConsensusGroupId, ConsensusResult<Ready>);

/// Drives all registered groups on a shared timer
pub struct TickCoordinator<W>
where
    W: BatchWriter,
{
    config: CoordinatorConfig,
    registry: Arc<GroupRegistry>,
    writer: Arc<W>,
    transport: Arc<PipelineTransport>,
    metrics: Arc<MetricsRegistry>,
    state: RwLock<CoordinatorState>,
    /// Serializes ticks from `tick` and `run`
    tick_lock: tokio::sync::Mutex<()>,
}

impl<W> fmt::Debug for TickCoordinator<W>
where
    W: BatchWriter,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TickCoordinator")
            .field("config", &self.config)
            .field("state", &self.state())
            .field("groups", &self.registry.len())
            .field("transport", &self.transport)
            .finish()
    }
}

/// Resets the coordinator to idle however the tick ends
struct TickingGuard<'a>(&'a RwLock<CoordinatorState>);

impl<'a> TickingGuard<'a> {
    fn enter(state: &'a RwLock<CoordinatorState>) -> Self {
        *state.write() = CoordinatorState::Ticking;
        Self(state)
    }
}

impl Drop for TickingGuard<'_> {
    fn drop(&mut self) {
        *self.0.write() = CoordinatorState::Idle;
    }
}

impl<W> TickCoordinator<W>
where
    W: BatchWriter,
{
    /// Create a coordinator from already constructed parts
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<GroupRegistry>,
        writer: Arc<W>,
        transport: Arc<PipelineTransport>,
        metrics: Arc<MetricsRegistry>,
    ) -> Self {
        metrics.ticks.registered_groups.set(registry.len() as i64);
        Self {
            config,
            registry,
            writer,
            transport,
            metrics,
            state: RwLock::new(CoordinatorState::Idle),
            tick_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Coordinator configuration
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Current state
    pub fn state(&self) -> CoordinatorState {
        *self.state.read()
    }

    /// Group registry
    pub fn registry(&self) -> &Arc<GroupRegistry> {
        &self.registry
    }

    /// Batch writer
    pub fn writer(&self) -> &Arc<W> {
        &self.writer
    }

    /// Transport the coordinator disseminates through
    pub fn transport(&self) -> &Arc<PipelineTransport> {
        &self.transport
    }

    /// Metrics registry
    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    /// Register a group; a group that is already registered is kept as is
    pub fn add_group<M>(&self, group_id: ConsensusGroupId, machine: M) -> bool
    where
        M: GroupStateMachine,
    {
        let added = self.registry.add_group(group_id, machine);
        self.metrics
            .ticks
            .registered_groups
            .set(self.registry.len() as i64);
        added
    }

    /// Detach a group and drop its queued messages
    pub fn remove_group(&self, group_id: ConsensusGroupId) -> bool {
        let removed = self.registry.remove_group(group_id).is_some();
        if removed {
            let purged = self.transport.purge_group(group_id);
            info!(%group_id, purged, "Removed group from coordinator");
        }
        self.metrics
            .ticks
            .registered_groups
            .set(self.registry.len() as i64);
        removed
    }

    /// Run one tick with the configured per-group timeout
    pub async fn tick(&self) -> ConsensusResult<TickReport> {
        self.tick_with_timeout(self.config.tick_timeout).await
    }

    /// Run one tick, abandoning advance steps that take longer than `timeout`
    ///
    /// Returns an error only when the batch could not be persisted. In
    /// that case no message of this tick reaches the transport.
    pub async fn tick_with_timeout(&self, timeout: Duration) -> ConsensusResult<TickReport> {
        let _serial = self.tick_lock.lock().await;
        let _ticking = TickingGuard::enter(&self.state);

        let snapshot = self.registry.snapshot();
        // The registry may also be edited directly
        self.metrics
            .ticks
            .registered_groups
            .set(snapshot.len() as i64);
        if snapshot.is_empty() {
            return Ok(TickReport::default());
        }

        self.metrics.ticks.ticks_total.inc();
        let _timer = self.metrics.ticks.tick_duration.start_timer();

        let mut report = TickReport {
            groups_ticked: snapshot.len(),
            ..Default::default()
        };

        let records = self.advance_all(snapshot, timeout, &mut report).await;

        let mut batch = Vec::with_capacity(records.len());
        for ready in records {
            if self.registry.contains(ready.group_id) {
                batch.push(ready);
            } else {
                debug!(group_id = %ready.group_id, "Discarding record of removed group");
                report.discarded += 1;
            }
        }

        if batch.is_empty() {
            debug!(groups = report.groups_ticked, "Tick produced no updates");
            return Ok(report);
        }
        batch.sort_by_key(|ready| ready.group_id);

        if let Err(e) = self.writer.persist_batch(&batch).await {
            self.metrics.ticks.persist_failures_total.inc();
            error!(records = batch.len(), "Failed to persist tick batch, skipping dissemination: {}", e);
            return Err(e);
        }
        self.metrics
            .ticks
            .persisted_records_total
            .inc_by(batch.len() as u64);

        for ready in batch {
            let group_id = ready.group_id;
            report.updated_groups.push(group_id);
            if ready.messages.is_empty() {
                continue;
            }

            match self.transport.pipeline(ready.messages) {
                Ok(pipelined) => {
                    report.messages_queued += pipelined.queued;
                    report.messages_dropped += pipelined.dropped;
                }
                Err(e) => {
                    warn!(%group_id, "Dissemination stopped: {}", e);
                    report.transport_errors += 1;
                }
            }
        }

        debug!(
            groups = report.groups_ticked,
            updated = report.updated_groups.len(),
            queued = report.messages_queued,
            dropped = report.messages_dropped,
            "Tick complete"
        );
        Ok(report)
    }

    /// Fan out one advance task per group and join them against a shared deadline
    async fn advance_all(
        &self,
        snapshot: Vec<GroupHandle>,
        timeout: Duration,
        report: &mut TickReport,
    ) -> Vec<Ready> {
        let deadline = Instant::now() + timeout;
        let mut tasks: JoinSet<AdvanceOutcome> = JoinSet::new();
        let mut pending = HashMap::with_capacity(snapshot.len());

        for handle in snapshot {
            let group_id = handle.group_id();
            let task = tasks.spawn(async move {
                let result = handle.advance().await;
                if let Ok(ready) = &result
                    && ready.leader.is_some()
                {
                    handle.set_leader(ready.leader);
                }
                (group_id, result)
            });
            pending.insert(task.id(), group_id);
        }

        let mut records = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next_with_id()).await {
                Ok(Some(Ok((task_id, (group_id, result))))) => {
                    pending.remove(&task_id);
                    match result {
                        Ok(ready) if ready.has_updates() => records.push(ready),
                        Ok(_) => {}
                        Err(e) if e.kind() == &ErrorKind::Busy => {
                            debug!(%group_id, "Group still advancing from an earlier tick");
                            report.busy.push(group_id);
                        }
                        Err(e) => {
                            self.metrics.ticks.group_errors_total.inc();
                            warn!(%group_id, "Group advance failed: {}", e);
                            report.failed.push(group_id);
                        }
                    }
                }
                Ok(Some(Err(join_error))) => {
                    let group_id = pending.remove(&join_error.id());
                    self.metrics.ticks.group_errors_total.inc();
                    let e = Error::from(join_error);
                    error!(group_id = ?group_id, "Group advance task failed: {}", e);
                    if let Some(group_id) = group_id {
                        report.failed.push(group_id);
                    }
                }
                Ok(None) => break,
                Err(_) => {
                    // Abandoned steps keep running detached and hold their group's lock
                    tasks.detach_all();
                    for group_id in pending.into_values() {
                        let e = Error::tick_timeout(
                            group_id,
                            format!("advance exceeded {}", humantime::format_duration(timeout)),
                        );
                        self.metrics.ticks.tick_timeouts_total.inc();
                        warn!(%group_id, "{}", e);
                        report.timed_out.push(group_id);
                    }
                    break;
                }
            }
        }

        report.timed_out.sort();
        report.failed.sort();
        report.busy.sort();
        records
    }

    /// Tick once per interval until cancelled
    ///
    /// A failed tick is logged and the loop carries on. A tick that is
    /// already running finishes before cancellation is observed.
    pub async fn run(&self, cancel: CancellationToken) -> ConsensusResult<()> {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            interval = %humantime::format_duration(self.config.tick_interval),
            groups = self.registry.len(),
            "Tick coordinator started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Tick coordinator stopped");
                    return Ok(());
                }
                _ = interval.tick() => {
                    if let Err(e) = self.tick().await {
                        error!("Tick failed: {}", e);
                    }
                }
            }
        }
    }

    /// Spawn the run loop on the current runtime
    pub fn start(self: &Arc<Self>) -> CoordinatorHandle {
        let cancel = CancellationToken::new();
        let coordinator = self.clone();
        let token = cancel.clone();
        let task = tokio::spawn(async move { coordinator.run(token).await });
        CoordinatorHandle { cancel, task }
    }
}

/// Handle to a run loop spawned by [`TickCoordinator::start`]
#[derive(Debug)]
pub struct CoordinatorHandle {
    cancel: CancellationToken,
    task: JoinHandle<ConsensusResult<()>>,
}

impl CoordinatorHandle {
    /// Token that stops the loop when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the loop and wait for it to exit
    pub async fn shutdown(self) -> ConsensusResult<()> {
        self.cancel.cancel();
        self.task.await?
    }
}
