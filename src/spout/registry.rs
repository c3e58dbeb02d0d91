use dashmap::DashMap;
use tracing::{debug, info};

use crate::broker::BrokerClient;
use crate::message::PartitionSet;
use crate::AppResult;

/// Per-topic cache of discovered partitions.
///
/// The first set stored for a topic, empty or not, is the one every caller sees
/// until the entry is invalidated, so partition positions stay stable for the
/// registry's lifetime.
/// Two callers resolving the same topic concurrently may both hit the broker, but
/// only the first insert is kept.
#[derive(Debug, Default)]
pub struct QueueRegistry {
    partitions: DashMap<String, PartitionSet>,
}

impl QueueRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cached(&self, topic: &str) -> Option<PartitionSet> {
        self.partitions.get(topic).map(|set| set.clone())
    }

    pub async fn resolve<B: BrokerClient>(&self, topic: &str, client: &B) -> AppResult<PartitionSet> {
        if let Some(set) = self.cached(topic) {
            return Ok(set);
        }

        let mut discovered = client.discover_partitions(topic).await?;
        discovered.sort();
        discovered.dedup();
        debug!("discovered {} partitions of topic {}", discovered.len(), topic);

        let set = self
            .partitions
            .entry(topic.to_string())
            .or_insert_with(|| PartitionSet::new(discovered))
            .value()
            .clone();
        Ok(set)
    }

    /// Forgets the partitions of `topic`; the next resolve rediscovers them.
    pub fn invalidate(&self, topic: &str) -> bool {
        let removed = self.partitions.remove(topic).is_some();
        if removed {
            info!("partition cache of topic {} invalidated", topic);
        }
        removed
    }

    pub fn clear(&self) {
        self.partitions.clear();
    }
}
