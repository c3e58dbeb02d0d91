mod coordinator;
mod host;
mod pull_engine;
mod registry;

pub use coordinator::BatchCoordinator;
pub use host::{
    Coordinator, Emitter, SpoutTuple, TransactionAttempt, TupleCollector, OUTPUT_FIELDS,
};
pub use pull_engine::PullEngine;
pub use registry::QueueRegistry;

use std::sync::Arc;

use tracing::info;

use crate::broker::{BrokerConnection, BrokerConnector};
use crate::{AppResult, SpoutConfig};

/// A partitioned transactional spout over one topic.
///
/// Owns the configuration, the partition registry and the broker connection,
/// and hands out the coordinator and emitter the host drives. Both share the
/// same registry and connection, so partition positions agree between them.
pub struct TransactionalSpout<C: BrokerConnector> {
    config: Arc<SpoutConfig>,
    registry: Arc<QueueRegistry>,
    connection: Arc<BrokerConnection<C>>,
}

impl<C: BrokerConnector> TransactionalSpout<C> {
    pub fn new(config: SpoutConfig, connector: C) -> AppResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        info!(
            "spout created for topic {} with tag expression {}",
            config.consumer.topic, config.consumer.topic_tag
        );
        Ok(Self {
            connection: Arc::new(BrokerConnection::new(connector, config.clone())),
            registry: Arc::new(QueueRegistry::new()),
            config,
        })
    }

    pub fn coordinator(&self) -> BatchCoordinator<C> {
        BatchCoordinator::new(
            self.config.consumer.topic.clone(),
            self.registry.clone(),
            self.connection.clone(),
        )
    }

    pub fn emitter(&self) -> AppResult<PullEngine<C>> {
        PullEngine::new(
            self.config.clone(),
            self.registry.clone(),
            self.connection.clone(),
        )
    }

    pub fn output_fields(&self) -> [&'static str; 2] {
        OUTPUT_FIELDS
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &SpoutConfig {
        &self.config
    }
}
