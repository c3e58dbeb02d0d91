use std::sync::Arc;

use tracing::{debug, error, info};

use crate::broker::{BrokerConnection, BrokerConnector};
use crate::message::PartitionSet;
use crate::AppResult;

use super::{Coordinator, QueueRegistry};

/// Hands the host the partitions of the configured topic for each transaction.
pub struct BatchCoordinator<C: BrokerConnector> {
    topic: String,
    registry: Arc<QueueRegistry>,
    connection: Arc<BrokerConnection<C>>,
}

impl<C: BrokerConnector> BatchCoordinator<C> {
    pub fn new(
        topic: impl Into<String>,
        registry: Arc<QueueRegistry>,
        connection: Arc<BrokerConnection<C>>,
    ) -> Self {
        Self {
            topic: topic.into(),
            registry,
            connection,
        }
    }

    async fn resolve_partitions(&self) -> AppResult<PartitionSet> {
        let client = self.connection.open().await?;
        self.registry.resolve(&self.topic, client.as_ref()).await
    }
}

impl<C: BrokerConnector> Coordinator for BatchCoordinator<C> {
    async fn partitions_for_next_batch(&self) -> PartitionSet {
        match self.resolve_partitions().await {
            Ok(partitions) => {
                debug!("partitions for next batch of {}: {:?}", self.topic, partitions);
                partitions
            }
            Err(e) => {
                error!("failed to fetch partitions of topic {}: {}", self.topic, e);
                PartitionSet::empty()
            }
        }
    }

    fn is_ready(&self, _tx_id: u64) -> bool {
        true
    }

    fn close(&self) {
        info!("close coordinator of topic {}", self.topic);
    }
}
