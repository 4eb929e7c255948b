//! Log storage abstraction
//!
//! Logs are indexed byte sequences grouped by namespace. Consensus groups
//! each own one namespace, and a single tick's output for many groups is
//! written through [`LogStorage::append_batch`] as one atomic unit.
//!
//! Key properties:
//! - No generic entry types or forced serialization
//! - Batches span namespaces and are applied all-or-nothing
//! - Indices within a namespace are contiguous

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::Display;

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Storage backend error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Entries do not continue the namespace's log
    #[error("Non-contiguous append to {namespace}: expected index {expected}, got {found}")]
    NonContiguous {
        /// Namespace the append targeted
        namespace: StorageNamespace,
        /// Next index the log expected
        expected: u64,
        /// Index that was supplied
        found: u64,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Storage has been shut down
    #[error("Storage is closed")]
    Closed,
}

/// A namespace for organizing data
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageNamespace(String);

impl StorageNamespace {
    /// Create a new storage namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the namespace as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StorageNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Entries destined for one namespace within a batch
pub type NamespaceEntries = (StorageNamespace, Vec<(u64, Bytes)>);

/// Log storage trait - stores indexed byte sequences per namespace
#[async_trait]
pub trait LogStorage: Send + Sync + 'static {
    /// Atomically append entries to several namespaces
    ///
    /// Either every entry of every namespace becomes durable or none does.
    async fn append_batch(&self, batch: Vec<NamespaceEntries>) -> StorageResult<()>;

    /// Atomically append entries (one or more) to a single namespace
    async fn append(
        &self,
        namespace: &StorageNamespace,
        entries: Vec<(u64, Bytes)>,
    ) -> StorageResult<()> {
        self.append_batch(vec![(namespace.clone(), entries)]).await
    }

    /// Get the current bounds of the log (first_index, last_index)
    async fn bounds(&self, namespace: &StorageNamespace) -> StorageResult<Option<(u64, u64)>>;

    /// Read a range of entries [start, end)
    async fn read_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<(u64, Bytes)>>;
}

/// Implement LogStorage for Arc<T> where T: LogStorage
#[async_trait]
impl<T: LogStorage> LogStorage for std::sync::Arc<T> {
    async fn append_batch(&self, batch: Vec<NamespaceEntries>) -> StorageResult<()> {
        (**self).append_batch(batch).await
    }

    async fn bounds(&self, namespace: &StorageNamespace) -> StorageResult<Option<(u64, u64)>> {
        (**self).bounds(namespace).await
    }

    async fn read_range(
        &self,
        namespace: &StorageNamespace,
        start: u64,
        end: u64,
    ) -> StorageResult<Vec<(u64, Bytes)>> {
        (**self).read_range(namespace, start, end).await
    }
}
