//! Coordinator builder pattern

use std::sync::Arc;

use crate::batch::BatchWriter;
use crate::config::CoordinatorConfig;
use crate::coordinator::TickCoordinator;
use crate::error::{ConsensusResult, Error, ErrorKind};
use crate::metrics::MetricsRegistry;
use crate::registry::GroupRegistry;
use crate::transport::PipelineTransport;

/// Coordinator builder
pub struct CoordinatorBuilder<W>
where
    W: BatchWriter,
{
    /// Configuration
    config: Option<CoordinatorConfig>,

    /// Batch writer
    writer: Option<Arc<W>>,

    /// Group registry, a fresh one when unset
    registry: Option<Arc<GroupRegistry>>,

    /// Metrics registry, a fresh one when unset
    metrics: Option<Arc<MetricsRegistry>>,
}

impl<W> Default for CoordinatorBuilder<W>
where
    W: BatchWriter,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<W> CoordinatorBuilder<W>
where
    W: BatchWriter,
{
    /// Create a new coordinator builder
    pub fn new() -> Self {
        Self {
            config: None,
            writer: None,
            registry: None,
            metrics: None,
        }
    }

    /// Set configuration
    pub fn with_config(mut self, config: CoordinatorConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Set batch writer
    pub fn with_writer(mut self, writer: W) -> Self {
        self.writer = Some(Arc::new(writer));
        self
    }

    /// Set a batch writer the caller keeps a handle to
    pub fn with_shared_writer(mut self, writer: Arc<W>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Share an existing group registry
    pub fn with_registry(mut self, registry: Arc<GroupRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Report into an existing metrics registry
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the coordinator
    pub fn build(self) -> ConsensusResult<TickCoordinator<W>> {
        let config = self
            .config
            .ok_or_else(|| Error::with_context(ErrorKind::Configuration, "Config not set"))?;
        config.validate()?;

        let writer = self
            .writer
            .ok_or_else(|| Error::with_context(ErrorKind::Configuration, "Batch writer not set"))?;

        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Arc::new(MetricsRegistry::new()?),
        };
        let registry = self.registry.unwrap_or_default();
        let transport = Arc::new(PipelineTransport::new(
            config.transport.clone(),
            metrics.clone(),
        )?);

        Ok(TickCoordinator::new(
            config, registry, writer, transport, metrics,
        ))
    }
}
