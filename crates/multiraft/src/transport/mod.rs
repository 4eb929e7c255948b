//! Credit-limited, non-blocking transport towards peer nodes

mod credit;
pub mod dispatch;
mod pipeline;

pub use credit::InflightTracker;
pub use dispatch::{DispatchStats, PeerDispatcher, PeerSink};
pub use pipeline::{DROP_NO_CREDIT, DROP_QUEUE_FULL, PipelineReport, PipelineTransport, SendOutcome};
