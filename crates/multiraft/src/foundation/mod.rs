//! Foundation module with core types and traits

pub mod traits;
pub mod types;

pub use traits::GroupStateMachine;
pub use types::{ConsensusGroupId, Message, MessageType, NodeId, Ready};
