//! Durable batch persistence of ready records

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use proven_storage::{LogStorage, NamespaceEntries, StorageNamespace};
use tracing::debug;

use crate::error::ConsensusResult;
use crate::foundation::{ConsensusGroupId, Ready};

/// Persists one tick's ready records as a single atomic unit
///
/// Success means every record is durable. On failure the caller must
/// assume none are and must not disseminate any of the records' messages.
/// Ordering among records carries no meaning.
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    /// Persist all records or none of them
    async fn persist_batch(&self, batch: &[Ready]) -> ConsensusResult<()>;
}

#[async_trait]
impl<T: BatchWriter> BatchWriter for Arc<T> {
    async fn persist_batch(&self, batch: &[Ready]) -> ConsensusResult<()> {
        (**self).persist_batch(batch).await
    }
}

/// Namespace holding a group's log
pub fn group_namespace(group_id: ConsensusGroupId) -> StorageNamespace {
    StorageNamespace::new(group_id.to_string())
}

/// Batch writer that appends every group's entries to its own log namespace
///
/// Each group's entries get contiguous indices after the last index in
/// its namespace. The whole tick goes to storage as one `append_batch`
/// call, and the cached last indices only move once that call succeeds.
pub struct LogBatchWriter<S>
where
    S: LogStorage,
{
    storage: S,
    /// Last persisted index per group
    last_indices: Mutex<HashMap<ConsensusGroupId, u64>>,
}

impl<S> LogBatchWriter<S>
where
    S: LogStorage,
{
    /// Create a writer over a storage backend
    pub fn new(storage: S) -> Self {
        Self {
            storage,
            last_indices: Mutex::new(HashMap::new()),
        }
    }

    /// Get the storage backend
    pub fn storage(&self) -> &S {
        &self.storage
    }

    /// Last index persisted for a group, consulting storage on first use
    pub async fn last_index(&self, group_id: ConsensusGroupId) -> ConsensusResult<u64> {
        if let Some(&last) = self.last_indices.lock().get(&group_id) {
            return Ok(last);
        }

        let last = self
            .storage
            .bounds(&group_namespace(group_id))
            .await?
            .map(|(_, last)| last)
            .unwrap_or(0);
        self.last_indices.lock().entry(group_id).or_insert(last);
        Ok(last)
    }
}

#[async_trait]
impl<S> BatchWriter for LogBatchWriter<S>
where
    S: LogStorage,
{
    async fn persist_batch(&self, batch: &[Ready]) -> ConsensusResult<()> {
        let mut appends: Vec<NamespaceEntries> = Vec::with_capacity(batch.len());
        let mut new_last: HashMap<ConsensusGroupId, u64> = HashMap::with_capacity(batch.len());

        for ready in batch.iter().filter(|ready| !ready.entries.is_empty()) {
            let last = match new_last.get(&ready.group_id) {
                Some(&last) => last,
                None => self.last_index(ready.group_id).await?,
            };
            let entries: Vec<(u64, Bytes)> = ready
                .entries
                .iter()
                .enumerate()
                .map(|(offset, entry)| (last + 1 + offset as u64, entry.clone()))
                .collect();

            new_last.insert(ready.group_id, last + entries.len() as u64);
            appends.push((group_namespace(ready.group_id), entries));
        }

        if appends.is_empty() {
            debug!(records = batch.len(), "Batch carries no log entries");
            return Ok(());
        }

        let entry_count: usize = appends.iter().map(|(_, entries)| entries.len()).sum();
        self.storage.append_batch(appends).await?;

        self.last_indices.lock().extend(new_last);

        debug!(
            records = batch.len(),
            entries = entry_count,
            "Persisted batch"
        );
        Ok(())
    }
}
