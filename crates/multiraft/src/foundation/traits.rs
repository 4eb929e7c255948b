//! The capability a consensus implementation provides to the coordinator

use async_trait::async_trait;

use crate::error::ConsensusResult;
use crate::foundation::types::{ConsensusGroupId, Ready};

/// One consensus group's state machine as seen by the tick coordinator
///
/// Implementations are advanced concurrently across distinct groups but
/// never concurrently with themselves. `advance` should honor the tick
/// timeout as a soft deadline; the coordinator abandons calls that
/// overrun it and leaves the group's pending state for a later tick.
#[async_trait]
pub trait GroupStateMachine: Send + Sync + 'static {
    /// Drive the group forward one tick and report what it produced
    async fn advance(&mut self, group_id: ConsensusGroupId) -> ConsensusResult<Ready>;
}
