//! Broker client seam
//!
//! The spout only talks to the message broker through [`BrokerClient`]:
//! partition discovery, bounded pulls, and reading/advancing/persisting the
//! consume cursor of a partition. A [`BrokerConnector`] opens the client once
//! per engine, see [`BrokerConnection`].

use std::future::Future;

use crate::message::{Partition, PullOutcome};
use crate::{AppResult, SpoutConfig};

pub use connection::BrokerConnection;
pub use memory::{MemoryBroker, PullRequest};

mod connection;
mod memory;

pub trait BrokerClient: Send + Sync + 'static {
    /// All partitions currently subscribed under `topic`, in any order.
    fn discover_partitions(
        &self,
        topic: &str,
    ) -> impl Future<Output = AppResult<Vec<Partition>>> + Send;

    /// Pulls at most `max_count` messages starting at `offset`.
    fn pull(
        &self,
        partition: &Partition,
        tag_expression: &str,
        offset: i64,
        max_count: u32,
    ) -> impl Future<Output = AppResult<PullOutcome>> + Send;

    /// The committed consume offset, negative when nothing was committed yet.
    fn committed_offset(&self, partition: &Partition)
        -> impl Future<Output = AppResult<i64>> + Send;

    fn set_committed_offset(
        &self,
        partition: &Partition,
        offset: i64,
    ) -> impl Future<Output = AppResult<()>> + Send;

    /// Flushes the committed offset of `partition` to durable storage.
    fn persist(&self, partition: &Partition) -> impl Future<Output = AppResult<()>> + Send;

    fn shutdown(&self) {}
}

pub trait BrokerConnector: Send + Sync + 'static {
    type Client: BrokerClient;

    fn connect(
        &self,
        config: &SpoutConfig,
        instance_name: &str,
    ) -> impl Future<Output = AppResult<Self::Client>> + Send;
}
