//! Pull Engine
//!
//! Emits the batch of one partition for one host transaction, either for the
//! first time (`emit_new`) or again from a stored token (`emit_replay`).
//!
//! # Pull-result handling
//!
//! | status                                     | tuples emitted           | token returned            |
//! |--------------------------------------------|--------------------------|---------------------------|
//! | FOUND with messages                        | one per tag-matched msg  | `[min_offset, next_begin)`|
//! | FOUND without messages                     | none                     | previous token            |
//! | NO_NEW_MESSAGE / NO_MATCHED_MESSAGE        | none                     | previous token            |
//! | OFFSET_ILLEGAL / SLAVE_LAG / SUBSCRIPTION_STALE | none, logged        | previous token            |
//!
//! Offsets always come from the raw pull; tag filtering only decides which
//! messages are emitted.
//!
//! # New batches and replays
//!
//! A new batch resumes at the previous token's `next_offset`, or at the broker's
//! committed offset when there is no previous token. After a non-empty pull the
//! broker cursor is moved to the pull's max offset and persisted. Broker failures
//! skip the batch and hand back the previous token.
//!
//! A replay pulls exactly the window of the stored token. Anything short of the
//! same window is an error: the host relies on replays matching the original
//! emission.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, trace, warn};

use crate::broker::{BrokerClient, BrokerConnection, BrokerConnector};
use crate::message::{
    BatchMetadata, BatchStat, Message, Partition, PartitionHandle, PartitionSet, PullOutcome,
    PullStatus, TagExpression,
};
use crate::{AppError, AppResult, SpoutConfig};

use super::{Emitter, QueueRegistry, SpoutTuple, TransactionAttempt, TupleCollector};

/// A usable pull: the token describing it, the messages to emit and the raw
/// max offset the cursor moves to.
#[derive(Debug)]
struct PulledBatch {
    meta: BatchMetadata,
    messages: Vec<Message>,
    max_offset: i64,
}

pub struct PullEngine<C: BrokerConnector> {
    config: Arc<SpoutConfig>,
    tag_expression: TagExpression,
    registry: Arc<QueueRegistry>,
    connection: Arc<BrokerConnection<C>>,
}

impl<C: BrokerConnector> PullEngine<C> {
    pub fn new(
        config: Arc<SpoutConfig>,
        registry: Arc<QueueRegistry>,
        connection: Arc<BrokerConnection<C>>,
    ) -> AppResult<Self> {
        let tag_expression = config.tag_expression()?;
        Ok(Self {
            config,
            tag_expression,
            registry,
            connection,
        })
    }

    /// Connects the broker client if that has not happened yet.
    pub async fn open(&self) -> AppResult<()> {
        self.connection.open().await.map(|_| ())
    }

    fn topic(&self) -> &str {
        &self.config.consumer.topic
    }

    fn topic_tag(&self) -> &str {
        &self.config.consumer.topic_tag
    }

    async fn partition_for(&self, client: &C::Client, handle: PartitionHandle) -> AppResult<Partition> {
        let partitions = self.registry.resolve(self.topic(), client).await?;
        partitions
            .get(handle.position())
            .cloned()
            .ok_or_else(|| {
                AppError::UnknownPartitionHandle(format!(
                    "{} of topic {} with {} partitions",
                    handle,
                    self.topic(),
                    partitions.len()
                ))
            })
    }

    async fn start_offset(
        &self,
        client: &C::Client,
        partition: &Partition,
        last_meta: Option<&BatchMetadata>,
    ) -> AppResult<i64> {
        match last_meta {
            Some(meta) => Ok(meta.next_offset()),
            None => Ok(client.committed_offset(partition).await?.max(0)),
        }
    }

    /// Maps a pull outcome to a usable batch, or `None` when there is nothing
    /// to emit. Nothing is emitted here.
    fn interpret_pull_result(
        &self,
        outcome: PullOutcome,
        partition: &Partition,
    ) -> AppResult<Option<PulledBatch>> {
        debug!("pull result of {}: {}", partition, outcome.status);
        match outcome.status {
            PullStatus::Found => {
                debug!("message found list size: {}", outcome.messages.len());
                if outcome.messages.is_empty() {
                    return Ok(None);
                }
                outcome.validate()?;
                let pulled_count = outcome.messages.len();
                let messages = self.tag_expression.filter(outcome.messages);
                let meta = BatchMetadata::new(
                    partition.clone(),
                    outcome.min_offset,
                    outcome.next_begin_offset,
                )?
                .with_stat(BatchStat::new(pulled_count, messages.len()))
                .with_completion();
                Ok(Some(PulledBatch {
                    meta,
                    messages,
                    max_offset: outcome.max_offset,
                }))
            }
            PullStatus::NoNewMessage => {
                debug!("no new messages for this pull request on {}", partition);
                Ok(None)
            }
            PullStatus::NoMatchedMessage => {
                debug!("no matched messages for this pull request on {}", partition);
                Ok(None)
            }
            PullStatus::OffsetIllegal => {
                error!(
                    "offset illegal on {}, broker suggests next begin offset {}",
                    partition, outcome.next_begin_offset
                );
                Ok(None)
            }
            PullStatus::SlaveLag => {
                warn!("master of {} is down and the slave lags behind", partition);
                Ok(None)
            }
            PullStatus::SubscriptionStale => {
                error!("subscription of {} is not the latest", partition);
                Ok(None)
            }
        }
    }

    /// One broker pull, bounded by the configured pull timeout. A timed-out
    /// pull counts as a transport failure.
    async fn pull(
        &self,
        client: &C::Client,
        partition: &Partition,
        offset: i64,
        max_count: u32,
    ) -> AppResult<PullOutcome> {
        let timeout = Duration::from_millis(self.config.broker.pull_timeout_ms);
        tokio::time::timeout(
            timeout,
            client.pull(partition, self.topic_tag(), offset, max_count),
        )
        .await
        .map_err(|_| {
            AppError::ConnectionFailure(format!(
                "pull of {} at offset {} timed out after {:?}",
                partition, offset, timeout
            ))
        })?
    }

    fn emit_batch(
        tx: TransactionAttempt,
        collector: &mut dyn TupleCollector,
        messages: Vec<Message>,
    ) {
        for message in messages {
            collector.emit(SpoutTuple { tx, message });
        }
    }

    async fn advance_cursor(&self, client: &C::Client, partition: &Partition, max_offset: i64) {
        let committed = async {
            client.set_committed_offset(partition, max_offset).await?;
            client.persist(partition).await
        };
        // tuples are already out, a failed cursor update is only logged
        if let Err(e) = committed.await {
            error!(
                "failed to persist consume offset {} of {}: {}",
                max_offset, partition, e
            );
        }
    }

    async fn try_emit_new(
        &self,
        tx: TransactionAttempt,
        collector: &mut dyn TupleCollector,
        handle: PartitionHandle,
        last_meta: Option<&BatchMetadata>,
    ) -> AppResult<Option<BatchMetadata>> {
        let client = self.connection.open().await?;
        let partition = self.partition_for(&client, handle).await?;
        let offset = self.start_offset(&client, &partition, last_meta).await?;
        let max_count = self.config.consumer.pull_batch_size;

        debug!(
            "begin to pull[partition: {}, tag: {}, offset: {}, max count: {}]",
            partition,
            self.topic_tag(),
            offset,
            max_count
        );
        let outcome = self.pull(&client, &partition, offset, max_count).await?;

        match self.interpret_pull_result(outcome, &partition)? {
            Some(batch) => {
                Self::emit_batch(tx, collector, batch.messages);
                self.advance_cursor(&client, &partition, batch.max_offset)
                    .await;
                Ok(Some(batch.meta))
            }
            None => Ok(None),
        }
    }

    async fn try_emit_replay(
        &self,
        tx: TransactionAttempt,
        collector: &mut dyn TupleCollector,
        handle: PartitionHandle,
        meta: &BatchMetadata,
    ) -> AppResult<()> {
        let max_count = u32::try_from(meta.message_count())
            .ok()
            .filter(|count| *count > 0)
            .ok_or_else(|| AppError::InvalidValue(format!("replay window of {}", meta)))?;

        let client = self.connection.open().await?;
        let partition = self.partition_for(&client, handle).await?;
        if partition != *meta.partition() {
            warn!(
                "replaying {} on partition {} at handle {}",
                meta, partition, handle
            );
        }

        let outcome = self
            .pull(&client, &partition, meta.offset(), max_count)
            .await?;
        let batch = self
            .interpret_pull_result(outcome, &partition)?
            .ok_or_else(|| AppError::ReplayFailed(format!("nothing pulled for {}", meta)))?;
        if batch.meta != *meta {
            return Err(AppError::ReplayFailed(format!(
                "pulled window [{}, {}) instead of {}",
                batch.meta.offset(),
                batch.meta.next_offset(),
                meta
            )));
        }

        Self::emit_batch(tx, collector, batch.messages);
        Ok(())
    }
}

impl<C: BrokerConnector> Emitter for PullEngine<C> {
    fn ordered_handles(&self, all_partitions: &PartitionSet) -> Vec<PartitionHandle> {
        trace!("ordered handles of {:?}", all_partitions);
        (0..all_partitions.len()).map(PartitionHandle::new).collect()
    }

    async fn emit_new(
        &self,
        tx: TransactionAttempt,
        collector: &mut dyn TupleCollector,
        handle: PartitionHandle,
        last_meta: Option<Arc<BatchMetadata>>,
    ) -> AppResult<Option<Arc<BatchMetadata>>> {
        trace!(
            "emit new batch[tx: {}, partition: {}, last meta: {:?}]",
            tx,
            handle,
            last_meta.as_deref().map(|m| m.to_string())
        );
        match self
            .try_emit_new(tx, collector, handle, last_meta.as_deref())
            .await
        {
            Ok(Some(meta)) => Ok(Some(Arc::new(meta))),
            Ok(None) => Ok(last_meta),
            Err(e) if e.is_transient() => {
                error!("pull failed for tx {} partition {}: {}", tx, handle, e);
                Ok(last_meta)
            }
            Err(e) => {
                error!("emit new batch failed for tx {} partition {}: {}", tx, handle, e);
                Err(e)
            }
        }
    }

    async fn emit_replay(
        &self,
        tx: TransactionAttempt,
        collector: &mut dyn TupleCollector,
        handle: PartitionHandle,
        meta: &Arc<BatchMetadata>,
    ) -> AppResult<()> {
        trace!("replay batch[tx: {}, partition: {}, meta: {}]", tx, handle, meta);
        self.try_emit_replay(tx, collector, handle, meta)
            .await
            .map_err(|e| {
                error!("replay failed for tx {} partition {}: {}", tx, handle, e);
                if e.is_transient() {
                    AppError::ReplayFailed(format!("{}: {}", meta, e))
                } else {
                    e
                }
            })
    }

    fn refresh_partitions(&self, handles: &[PartitionHandle]) {
        trace!("refresh partitions ignored for {} handles", handles.len());
    }

    fn close(&self) {
        self.connection.close();
        info!("close emitter of topic {}", self.topic());
    }
}
