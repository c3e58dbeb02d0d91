use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::info;

use crate::message::{Message, Partition, PullOutcome, PullStatus};
use crate::{AppError, AppResult, SpoutConfig};

use super::{BrokerClient, BrokerConnector};

/// Parameters of one pull as the broker received them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullRequest {
    pub partition: Partition,
    pub tag_expression: String,
    pub offset: i64,
    pub max_count: u32,
}

#[derive(Debug, Default)]
struct QueueData {
    /// offset of `messages[0]`
    base_offset: i64,
    messages: Vec<Message>,
}

impl QueueData {
    fn end_offset(&self) -> i64 {
        self.base_offset + self.messages.len() as i64
    }
}

#[derive(Debug, Default)]
struct Inner {
    broker_name: String,
    queues: DashMap<Partition, QueueData>,
    committed: DashMap<Partition, i64>,
    persisted: DashMap<Partition, i64>,
    scripted: Mutex<VecDeque<AppResult<PullOutcome>>>,
    pull_log: Mutex<Vec<PullRequest>>,
    unreachable: AtomicBool,
    pull_delay_ms: AtomicU64,
    connect_calls: AtomicUsize,
    discovery_calls: AtomicUsize,
    shutdown_calls: AtomicUsize,
}

/// A broker living in process memory, used to drive the spout in tests and
/// in the demo binary.
///
/// Queues are plain vectors; pulls return the raw window without applying the
/// tag expression. Pull outcomes can be scripted ahead of time, and the broker
/// can be made unreachable to exercise failure paths.
#[derive(Debug, Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new(broker_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker_name: broker_name.into(),
                ..Default::default()
            }),
        }
    }

    pub fn partition(&self, topic: &str, queue_id: i32) -> Partition {
        Partition::new(topic, self.inner.broker_name.as_str(), queue_id)
    }

    pub fn create_topic(&self, topic: &str, queue_count: i32) {
        for queue_id in 0..queue_count {
            self.inner
                .queues
                .entry(self.partition(topic, queue_id))
                .or_default();
        }
    }

    /// Appends a message and returns its offset. The queue is created if needed.
    pub fn append(&self, topic: &str, queue_id: i32, tags: Option<&str>, body: Bytes) -> i64 {
        let mut queue = self
            .inner
            .queues
            .entry(self.partition(topic, queue_id))
            .or_default();
        let offset = queue.end_offset();
        let message = Message::new(topic, queue_id, offset, body);
        let message = match tags {
            Some(tags) => message.with_tags(tags),
            None => message,
        };
        queue.messages.push(message);
        offset
    }

    /// Drops every message below `offset`, as retention would.
    pub fn truncate_before(&self, partition: &Partition, offset: i64) {
        if let Some(mut queue) = self.inner.queues.get_mut(partition) {
            let drop_count = (offset - queue.base_offset).clamp(0, queue.messages.len() as i64);
            queue.messages.drain(..drop_count as usize);
            queue.base_offset += drop_count;
        }
    }

    /// Queues an outcome returned by the next pull instead of the stored data.
    pub fn script_pull(&self, outcome: AppResult<PullOutcome>) {
        self.inner.scripted.lock().push_back(outcome);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.inner.unreachable.store(unreachable, Ordering::Release);
    }

    /// Makes every following pull take `delay` before answering.
    pub fn set_pull_delay(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.inner.pull_delay_ms.store(millis, Ordering::Release);
    }

    pub fn set_committed(&self, partition: &Partition, offset: i64) {
        self.inner.committed.insert(partition.clone(), offset);
    }

    pub fn committed(&self, partition: &Partition) -> Option<i64> {
        self.inner.committed.get(partition).map(|o| *o)
    }

    pub fn persisted(&self, partition: &Partition) -> Option<i64> {
        self.inner.persisted.get(partition).map(|o| *o)
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.inner.pull_log.lock().clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.inner.connect_calls.load(Ordering::Acquire)
    }

    pub fn discovery_calls(&self) -> usize {
        self.inner.discovery_calls.load(Ordering::Acquire)
    }

    pub fn shutdown_calls(&self) -> usize {
        self.inner.shutdown_calls.load(Ordering::Acquire)
    }

    fn ensure_reachable(&self) -> AppResult<()> {
        if self.inner.unreachable.load(Ordering::Acquire) {
            return Err(AppError::ConnectionFailure(format!(
                "broker {} is unreachable",
                self.inner.broker_name
            )));
        }
        Ok(())
    }

    fn read_queue(&self, partition: &Partition, offset: i64, max_count: u32) -> AppResult<PullOutcome> {
        let queue = self.inner.queues.get(partition).ok_or_else(|| {
            AppError::ConnectionFailure(format!("no route info for {}", partition))
        })?;
        let end_offset = queue.end_offset();
        if offset < queue.base_offset {
            return Ok(PullOutcome::empty(PullStatus::OffsetIllegal, queue.base_offset));
        }
        if offset > end_offset {
            return Ok(PullOutcome::empty(PullStatus::OffsetIllegal, end_offset));
        }
        if offset == end_offset {
            return Ok(PullOutcome::empty(PullStatus::NoNewMessage, offset));
        }
        let start = (offset - queue.base_offset) as usize;
        let end = (start + max_count as usize).min(queue.messages.len());
        Ok(PullOutcome::found(queue.messages[start..end].to_vec(), offset))
    }
}

impl BrokerConnector for MemoryBroker {
    type Client = MemoryBroker;

    async fn connect(&self, config: &SpoutConfig, instance_name: &str) -> AppResult<MemoryBroker> {
        self.inner.connect_calls.fetch_add(1, Ordering::AcqRel);
        self.ensure_reachable()?;
        info!(
            "memory broker {} accepted client {} of group {:?}, pull timeout {}ms",
            self.inner.broker_name,
            instance_name,
            config.consumer.group_id,
            config.broker.pull_timeout_ms
        );
        Ok(self.clone())
    }
}

impl BrokerClient for MemoryBroker {
    async fn discover_partitions(&self, topic: &str) -> AppResult<Vec<Partition>> {
        self.inner.discovery_calls.fetch_add(1, Ordering::AcqRel);
        self.ensure_reachable()?;
        Ok(self
            .inner
            .queues
            .iter()
            .filter(|entry| entry.key().topic == topic)
            .map(|entry| entry.key().clone())
            .collect())
    }

    async fn pull(
        &self,
        partition: &Partition,
        tag_expression: &str,
        offset: i64,
        max_count: u32,
    ) -> AppResult<PullOutcome> {
        self.ensure_reachable()?;
        let delay = self.inner.pull_delay_ms.load(Ordering::Acquire);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        self.inner.pull_log.lock().push(PullRequest {
            partition: partition.clone(),
            tag_expression: tag_expression.to_string(),
            offset,
            max_count,
        });
        let scripted = self.inner.scripted.lock().pop_front();
        match scripted {
            Some(outcome) => outcome,
            None => self.read_queue(partition, offset, max_count),
        }
    }

    async fn committed_offset(&self, partition: &Partition) -> AppResult<i64> {
        self.ensure_reachable()?;
        Ok(self.committed(partition).unwrap_or(-1))
    }

    async fn set_committed_offset(&self, partition: &Partition, offset: i64) -> AppResult<()> {
        self.ensure_reachable()?;
        self.set_committed(partition, offset);
        Ok(())
    }

    async fn persist(&self, partition: &Partition) -> AppResult<()> {
        self.ensure_reachable()?;
        if let Some(offset) = self.committed(partition) {
            self.inner.persisted.insert(partition.clone(), offset);
        }
        Ok(())
    }

    fn shutdown(&self) {
        self.inner.shutdown_calls.fetch_add(1, Ordering::AcqRel);
    }
}
