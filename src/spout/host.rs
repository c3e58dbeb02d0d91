use std::fmt::{Display, Formatter};
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::message::{BatchMetadata, Message, PartitionHandle, PartitionSet};
use crate::AppResult;

/// Field names of every emitted tuple.
pub const OUTPUT_FIELDS: [&str; 2] = ["tId", "message"];

/// A host transaction and the attempt number at which it is being emitted.
/// Replays of a batch carry the same transaction id and a later attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionAttempt {
    pub transaction_id: u64,
    pub attempt_id: u64,
}

impl TransactionAttempt {
    pub fn new(transaction_id: u64, attempt_id: u64) -> Self {
        Self {
            transaction_id,
            attempt_id,
        }
    }
}

impl Display for TransactionAttempt {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.transaction_id, self.attempt_id)
    }
}

/// One emitted message, tagged with the transaction attempt that emitted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpoutTuple {
    pub tx: TransactionAttempt,
    pub message: Message,
}

pub trait TupleCollector: Send {
    fn emit(&mut self, tuple: SpoutTuple);
}

impl TupleCollector for Vec<SpoutTuple> {
    fn emit(&mut self, tuple: SpoutTuple) {
        self.push(tuple);
    }
}

/// Host-facing side deciding which partitions take part in a transaction.
pub trait Coordinator: Send + Sync {
    fn partitions_for_next_batch(&self) -> impl Future<Output = PartitionSet> + Send;

    fn is_ready(&self, tx_id: u64) -> bool;

    fn close(&self);
}

/// Host-facing side emitting the batch of one partition for one transaction.
///
/// `emit_new` returns the token to persist for the batch; when nothing was
/// pulled it returns `last_meta` itself (`Arc::ptr_eq` holds). An `Err` means
/// the callback cannot proceed at all. `emit_replay` must reproduce the batch
/// described by `meta` or fail.
pub trait Emitter: Send + Sync {
    fn ordered_handles(&self, all_partitions: &PartitionSet) -> Vec<PartitionHandle>;

    fn emit_new(
        &self,
        tx: TransactionAttempt,
        collector: &mut dyn TupleCollector,
        handle: PartitionHandle,
        last_meta: Option<Arc<BatchMetadata>>,
    ) -> impl Future<Output = AppResult<Option<Arc<BatchMetadata>>>> + Send;

    fn emit_replay(
        &self,
        tx: TransactionAttempt,
        collector: &mut dyn TupleCollector,
        handle: PartitionHandle,
        meta: &Arc<BatchMetadata>,
    ) -> impl Future<Output = AppResult<()>> + Send;

    fn refresh_partitions(&self, handles: &[PartitionHandle]);

    fn close(&self);
}
