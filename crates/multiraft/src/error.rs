//! Error types for the multi-group coordinator

use std::fmt;

use proven_storage::StorageError;
use thiserror::Error;

use crate::foundation::types::ConsensusGroupId;

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, Error>;

/// Main error type for the coordinator
#[derive(Debug, Error)]
pub struct Error {
    /// Error kind
    kind: ErrorKind,
    /// Error context
    context: ErrorContext,
}

impl Error {
    /// Create a new error
    pub fn new(kind: ErrorKind, context: ErrorContext) -> Self {
        Self { kind, context }
    }

    /// Create error with string context
    pub fn with_context(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: ErrorContext::Message(context.into()),
        }
    }

    /// Get error kind
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// Get error context
    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Configuration, msg)
    }

    /// Create a tick timeout error for a single group
    pub fn tick_timeout(group_id: ConsensusGroupId, msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Timeout,
            context: ErrorContext::Group {
                group_id,
                message: msg.into(),
            },
        }
    }

    /// Create a persist error
    pub fn persist(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::Persist, msg)
    }

    /// Create a transport setup error
    pub fn transport_setup(msg: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::TransportSetup, msg)
    }

    /// Create a busy error for a group that is still advancing
    pub fn busy(group_id: ConsensusGroupId) -> Self {
        Self {
            kind: ErrorKind::Busy,
            context: ErrorContext::Group {
                group_id,
                message: "previous advance still running".to_string(),
            },
        }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::with_context(ErrorKind::NotFound, what)
    }

    /// Create a consensus error raised by a group state machine
    pub fn consensus(group_id: ConsensusGroupId, msg: impl Into<String>) -> Self {
        Self {
            kind: ErrorKind::Consensus,
            context: ErrorContext::Group {
                group_id,
                message: msg.into(),
            },
        }
    }

    /// Check if this is a persist error
    pub fn is_persist(&self) -> bool {
        matches!(self.kind, ErrorKind::Persist)
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self.kind, ErrorKind::Configuration)
    }

    /// Get the group a group-scoped error refers to
    pub fn group_id(&self) -> Option<ConsensusGroupId> {
        match &self.context {
            ErrorContext::Group { group_id, .. } => Some(*group_id),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            ErrorContext::Message(msg) => write!(f, "{}: {}", self.kind, msg),
            ErrorContext::Chain { message, source } => {
                write!(f, "{}: {} (caused by: {})", self.kind, message, source)
            }
            ErrorContext::Group { group_id, message } => {
                write!(f, "{}: {} ({})", self.kind, message, group_id)
            }
        }
    }
}

/// Error kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid limits or intervals at construction
    Configuration,
    /// A group's advance step exceeded its deadline
    Timeout,
    /// The batch writer failed to make a tick durable
    Persist,
    /// A peer stream could not be established
    TransportSetup,
    /// The group is still running a previous advance
    Busy,
    /// Resource not found
    NotFound,
    /// Error reported by a group state machine
    Consensus,
    /// Internal error
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Configuration => write!(f, "Configuration error"),
            ErrorKind::Timeout => write!(f, "Tick timeout"),
            ErrorKind::Persist => write!(f, "Persist error"),
            ErrorKind::TransportSetup => write!(f, "Transport setup error"),
            ErrorKind::Busy => write!(f, "Group busy"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::Consensus => write!(f, "Consensus error"),
            ErrorKind::Internal => write!(f, "Internal error"),
        }
    }
}

/// Error context
#[derive(Debug)]
pub enum ErrorContext {
    /// Simple message
    Message(String),
    /// Error chain with source
    Chain {
        /// Error message
        message: String,
        /// Source error
        source: Box<dyn std::error::Error + Send + Sync>,
    },
    /// Error scoped to a single consensus group
    Group {
        /// Group the error belongs to
        group_id: ConsensusGroupId,
        /// Error message
        message: String,
    },
}

// Conversion implementations for common error types

impl From<StorageError> for Error {
    fn from(err: StorageError) -> Self {
        Self {
            kind: ErrorKind::Persist,
            context: ErrorContext::Chain {
                message: "Batch append failed".to_string(),
                source: Box::new(err),
            },
        }
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self {
            kind: ErrorKind::Internal,
            context: ErrorContext::Chain {
                message: "Task join error".to_string(),
                source: Box::new(err),
            },
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self {
            kind: ErrorKind::Configuration,
            context: ErrorContext::Chain {
                message: "Invalid configuration document".to_string(),
                source: Box::new(err),
            },
        }
    }
}
