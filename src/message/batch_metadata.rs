use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{AppError, AppResult};

use super::{BatchCompletion, Partition};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchStat {
    /// raw messages returned by the pull
    pub pulled_count: u64,
    /// messages left after tag filtering
    pub emitted_count: u64,
    pub pulled_at: DateTime<Utc>,
}

impl BatchStat {
    pub fn new(pulled_count: usize, emitted_count: usize) -> Self {
        Self {
            pulled_count: pulled_count as u64,
            emitted_count: emitted_count as u64,
            pulled_at: Utc::now(),
        }
    }
}

/// Token for one batch of one partition: the half-open offset window
/// `[offset, next_offset)` of the raw pull that produced it.
///
/// The host stores the token and hands it back either to resume (`next_offset`)
/// or to replay the exact same window. Two tokens are equal when their windows
/// are equal, whatever their batch id or partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "StoredBatch")]
pub struct BatchMetadata {
    batch_id: Uuid,
    partition: Partition,
    offset: i64,
    next_offset: i64,
    stat: Option<BatchStat>,
    #[serde(skip)]
    completion: Option<BatchCompletion>,
}

/// Wire form of a persisted token; goes through [`BatchMetadata::new`] so a
/// stored window obeys the same rules as a fresh one.
#[derive(Deserialize)]
struct StoredBatch {
    batch_id: Uuid,
    partition: Partition,
    offset: i64,
    next_offset: i64,
    stat: Option<BatchStat>,
}

impl TryFrom<StoredBatch> for BatchMetadata {
    type Error = AppError;

    fn try_from(stored: StoredBatch) -> AppResult<Self> {
        let mut meta = BatchMetadata::new(stored.partition, stored.offset, stored.next_offset)?;
        meta.batch_id = stored.batch_id;
        meta.stat = stored.stat;
        Ok(meta)
    }
}

impl BatchMetadata {
    pub fn new(partition: Partition, offset: i64, next_offset: i64) -> AppResult<Self> {
        if offset < 0 || next_offset < offset {
            return Err(AppError::InvalidValue(format!(
                "batch offset window [{}, {}) of {}",
                offset, next_offset, partition
            )));
        }
        Ok(Self {
            batch_id: Uuid::new_v4(),
            partition,
            offset,
            next_offset,
            stat: None,
            completion: None,
        })
    }

    pub fn with_stat(mut self, stat: BatchStat) -> Self {
        self.stat = Some(stat);
        self
    }

    /// Attaches a fresh completion signal; see [`BatchCompletion`].
    pub fn with_completion(mut self) -> Self {
        self.completion = Some(BatchCompletion::new());
        self
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    pub fn partition(&self) -> &Partition {
        &self.partition
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    pub fn next_offset(&self) -> i64 {
        self.next_offset
    }

    /// Number of raw messages covered by the window.
    pub fn message_count(&self) -> i64 {
        self.next_offset - self.offset
    }

    pub fn stat(&self) -> Option<&BatchStat> {
        self.stat.as_ref()
    }

    pub fn completion(&self) -> Option<&BatchCompletion> {
        self.completion.as_ref()
    }
}

impl PartialEq for BatchMetadata {
    fn eq(&self, other: &Self) -> bool {
        self.offset == other.offset && self.next_offset == other.next_offset
    }
}

impl Eq for BatchMetadata {}

impl Hash for BatchMetadata {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.offset.hash(state);
        self.next_offset.hash(state);
    }
}

impl Display for BatchMetadata {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "BatchMetadata[batch_id={}, partition={}, offset={}, next_offset={}]",
            self.batch_id, self.partition, self.offset, self.next_offset
        )
    }
}
