//! Log storage traits for multi-group consensus
//!
//! This crate provides a minimal log storage interface that the batch
//! writer persists ready records through. Backends only need to store
//! indexed byte sequences per namespace and apply a batch atomically.

pub mod log;

// Re-export the essential types
pub use log::{LogStorage, NamespaceEntries, StorageError, StorageNamespace, StorageResult};
