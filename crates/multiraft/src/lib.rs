//! Concurrent coordinator for many independent consensus groups
//!
//! This crate drives a set of consensus groups on a shared timer where:
//! - Every group advances in parallel and in isolation from the others
//! - One tick's output is persisted as a single batch
//! - Messages leave the node only after their tick is durable
//! - Sending never blocks; backpressure drops messages instead

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::result_large_err)]

/// Batch persistence of ready records
pub mod batch;

/// Builder for the coordinator
pub mod builder;

/// Configuration types
pub mod config;

/// Tick coordinator
pub mod coordinator;

/// Error types
pub mod error;

/// Foundation module with core types and traits
pub mod foundation;

/// Prometheus metrics
pub mod metrics;

/// Group registry
pub mod registry;

/// Pipelined transport
pub mod transport;

pub use {
    batch::{BatchWriter, LogBatchWriter},
    builder::CoordinatorBuilder,
    config::{CoordinatorConfig, TransportConfig},
    coordinator::{CoordinatorHandle, CoordinatorState, TickCoordinator, TickReport},
    error::{ConsensusResult, Error, ErrorKind},
    foundation::{ConsensusGroupId, GroupStateMachine, Message, MessageType, NodeId, Ready},
    registry::{GroupHandle, GroupRegistry},
    transport::{PipelineTransport, SendOutcome},
};
