//! In-memory log storage implementation

use async_trait::async_trait;
use bytes::Bytes;
use proven_storage::{
    LogStorage, NamespaceEntries, StorageError, StorageNamespace, StorageResult,
};
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};
use tokio::sync::RwLock;
use tracing::debug;

/// In-memory log storage implementation using BTreeMap for ordering
///
/// A batch is validated against the current logs before anything is
/// written, so a rejected batch leaves every namespace untouched.
#[derive(Clone)]
pub struct MemoryStorage {
    /// Log storage: namespace -> (index -> bytes)
    logs: Arc<RwLock<HashMap<StorageNamespace, BTreeMap<u64, Bytes>>>>,
    /// Set once the storage has been closed
    closed: Arc<AtomicBool>,
}

impl MemoryStorage {
    /// Create a new in-memory storage instance
    pub fn new() -> Self {
        Self {
            logs: Arc::new(RwLock::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Close the storage; every later append fails with [`StorageError::Closed`]
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the storage has been closed
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of namespaces holding at least one entry
    pub async fn namespace_count(&self) -> usize {
        self.logs
            .read()
            .await
            .values()
            .filter(|log| !log.is_empty())
            .count()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

/// Check that every namespace in the batch continues its log without gaps
fn validate_batch(
    logs: &HashMap<StorageNamespace, BTreeMap<u64, Bytes>>,
    batch: &[NamespaceEntries],
) -> StorageResult<()> {
    let mut next_expected: HashMap<&StorageNamespace, u64> = HashMap::new();

    for (namespace, entries) in batch {
        for (index, _) in entries {
            let expected = match next_expected.get(namespace) {
                Some(&expected) => Some(expected),
                None => logs
                    .get(namespace)
                    .and_then(|log| log.keys().next_back())
                    .map(|last| last + 1),
            };

            if let Some(expected) = expected
                && *index != expected
            {
                return Err(StorageError::NonContiguous {
                    namespace: namespace.clone(),
                    expected,
                    found: *index,
                });
            }

            next_expected.insert(namespace, index + 1);
        }
    }

    Ok(())
}

#[async_trait]
impl LogStorage for MemoryStorage {
    async fn append_batch(&self, batch: Vec<NamespaceEntries>) -> StorageResult<()> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }

        let mut logs = self.logs.write().await;
        validate_batch(&logs, &batch)?;

        let mut written = 0usize;
        for (namespace, entries) in batch {
            if entries.is_empty() {
                continue;
            }
            written += entries.len();
            logs.entry(namespace).or_default().extend(entries);
        }

        debug!(entries = written, "Applied batch to memory storage");
        Ok(())
    }

    async fn bounds(&self, namespace: &StorageNamespace) -> StorageResult<Option<(u64, u64)>> {
        let logs = self.logs.read().await;
        Ok(logs.get(namespace).and_then(|log| {
            let first = log.keys().next()?;
            let last = log.keys().next_back()?;
            Some((*first, *last))
        }))
    }

    async fn read_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<(u64, Bytes)>> {
        if start >= end {
            return Ok(Vec::new());
        }

        let logs = self.logs.read().await;
        Ok(logs
            .get(namespace)
            .map(|log| {
                log.range(start..end)
                    .map(|(&idx, data)| (idx, data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage")
            .field("logs", &"<locked>")
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_storage_append_and_get() {
        let storage = MemoryStorage::new();
        let namespace = StorageNamespace::new("test");

        // Test single entry append
        let entries = vec![(1, Bytes::from("test data 1"))];
        storage.append(&namespace, entries).await.unwrap();

        // Test read single entry via range
        let result = storage.read_range(&namespace, 1, 2).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0], (1, Bytes::from("test data 1")));

        // Test bounds
        let bounds = storage.bounds(&namespace).await.unwrap();
        assert_eq!(bounds, Some((1, 1)));
    }

    #[tokio::test]
    async fn test_batch_spans_namespaces() {
        let storage = MemoryStorage::new();
        let a = StorageNamespace::new("group-1");
        let b = StorageNamespace::new("group-3");

        storage
            .append_batch(vec![
                (a.clone(), vec![(1, Bytes::from("a1")), (2, Bytes::from("a2"))]),
                (b.clone(), vec![(1, Bytes::from("b1"))]),
            ])
            .await
            .unwrap();

        assert_eq!(storage.bounds(&a).await.unwrap(), Some((1, 2)));
        assert_eq!(storage.bounds(&b).await.unwrap(), Some((1, 1)));
        assert_eq!(storage.namespace_count().await, 2);

        let range = storage.read_range(&a, 1, 10).await.unwrap();
        assert_eq!(range.len(), 2);
        assert_eq!(range[1], (2, Bytes::from("a2")));
    }

    #[tokio::test]
    async fn test_rejected_batch_writes_nothing() {
        let storage = MemoryStorage::new();
        let a = StorageNamespace::new("group-1");
        let b = StorageNamespace::new("group-2");

        storage
            .append(&b, vec![(1, Bytes::from("b1"))])
            .await
            .unwrap();

        // Namespace b expects index 2 next, so the whole batch must be rejected
        let result = storage
            .append_batch(vec![
                (a.clone(), vec![(1, Bytes::from("a1"))]),
                (b.clone(), vec![(5, Bytes::from("b5"))]),
            ])
            .await;

        match result {
            Err(StorageError::NonContiguous {
                expected, found, ..
            }) => {
                assert_eq!(expected, 2);
                assert_eq!(found, 5);
            }
            other => panic!("unexpected result: {other:?}"),
        }

        assert_eq!(storage.bounds(&a).await.unwrap(), None);
        assert_eq!(storage.bounds(&b).await.unwrap(), Some((1, 1)));
    }

    #[tokio::test]
    async fn test_closed_storage_rejects_appends() {
        let storage = MemoryStorage::new();
        let namespace = StorageNamespace::new("test");

        storage.close();
        let result = storage
            .append(&namespace, vec![(1, Bytes::from("data"))])
            .await;
        assert!(matches!(result, Err(StorageError::Closed)));
        assert_eq!(storage.bounds(&namespace).await.unwrap(), None);
    }
}
