//! Shared fixtures for coordinator integration tests

#![allow(dead_code)]

pub mod test_groups;

use std::sync::Arc;

use proven_multiraft::{
    BatchWriter, CoordinatorBuilder, CoordinatorConfig, TickCoordinator, TransportConfig,
};
use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initialize logging once per test binary
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive(Level::INFO.into())
                .add_directive("proven_multiraft=debug".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

/// Configuration with small limits and fast ticks
pub fn test_config(inflight_limit: usize, queue_capacity: usize) -> CoordinatorConfig {
    CoordinatorConfig {
        transport: TransportConfig {
            inflight_limit,
            queue_capacity,
            max_peers: None,
        },
        ..Default::default()
    }
}

/// Build a coordinator around a shared writer
pub fn coordinator_with<W: BatchWriter>(
    config: CoordinatorConfig,
    writer: Arc<W>,
) -> Arc<TickCoordinator<W>> {
    Arc::new(
        CoordinatorBuilder::new()
            .with_config(config)
            .with_shared_writer(writer)
            .build()
            .expect("Failed to build coordinator"),
    )
}
