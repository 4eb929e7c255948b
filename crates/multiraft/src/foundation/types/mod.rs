//! Core types shared by the registry, coordinator and transport

mod ids;
mod message;
mod ready;

pub use ids::{ConsensusGroupId, NodeId};
pub use message::{Message, MessageType};
pub use ready::Ready;
