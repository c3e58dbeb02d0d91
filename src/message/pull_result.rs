use std::fmt::{Display, Formatter};

use bytes::Bytes;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

/// A message as stored in a partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub msg_id: String,
    pub topic: String,
    pub tags: Option<String>,
    pub queue_id: i32,
    pub queue_offset: i64,
    pub born_timestamp: i64,
    pub body: Bytes,
}

impl Message {
    pub fn new(topic: impl Into<String>, queue_id: i32, queue_offset: i64, body: Bytes) -> Self {
        let topic = topic.into();
        Self {
            msg_id: format!("{}-{}-{:016X}", topic, queue_id, queue_offset),
            topic,
            tags: None,
            queue_id,
            queue_offset,
            born_timestamp: Utc::now().timestamp_millis(),
            body,
        }
    }

    pub fn with_tags(mut self, tags: impl Into<String>) -> Self {
        self.tags = Some(tags.into());
        self
    }

}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullStatus {
    Found,
    NoNewMessage,
    NoMatchedMessage,
    OffsetIllegal,
    SlaveLag,
    SubscriptionStale,
}

impl Display for PullStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PullStatus::Found => "FOUND",
            PullStatus::NoNewMessage => "NO_NEW_MESSAGE",
            PullStatus::NoMatchedMessage => "NO_MATCHED_MESSAGE",
            PullStatus::OffsetIllegal => "OFFSET_ILLEGAL",
            PullStatus::SlaveLag => "SLAVE_LAG",
            PullStatus::SubscriptionStale => "SUBSCRIPTION_STALE",
        };
        f.write_str(name)
    }
}

/// The result of one bounded pull. `messages` is only meaningful for
/// [`PullStatus::Found`] and is always the raw, unfiltered batch.
#[derive(Debug, Clone)]
pub struct PullOutcome {
    pub status: PullStatus,
    pub messages: Vec<Message>,
    pub min_offset: i64,
    pub max_offset: i64,
    pub next_begin_offset: i64,
}

impl PullOutcome {
    /// A found batch whose offsets are taken from the messages themselves.
    /// `start_offset` is only used when `messages` is empty.
    pub fn found(messages: Vec<Message>, start_offset: i64) -> Self {
        match (messages.first(), messages.last()) {
            (Some(first), Some(last)) => Self {
                status: PullStatus::Found,
                min_offset: first.queue_offset,
                max_offset: last.queue_offset,
                next_begin_offset: last.queue_offset.saturating_add(1),
                messages,
            },
            _ => Self::empty(PullStatus::Found, start_offset),
        }
    }

    pub fn empty(status: PullStatus, next_begin_offset: i64) -> Self {
        Self {
            status,
            messages: Vec::new(),
            min_offset: next_begin_offset,
            max_offset: next_begin_offset,
            next_begin_offset,
        }
    }

    /// Checks the offset relations a non-empty found batch must satisfy:
    /// `next_begin_offset == max_offset + 1` and one raw message per offset in
    /// `[min_offset, max_offset]`. Offsets come from the broker, so overflowing
    /// relations are reported, not computed.
    pub fn validate(&self) -> AppResult<()> {
        if self.status != PullStatus::Found || self.messages.is_empty() {
            return Ok(());
        }
        if self.min_offset < 0 {
            return Err(AppError::InconsistentPullResult(format!(
                "negative min offset {}",
                self.min_offset
            )));
        }
        if self.max_offset.checked_add(1) != Some(self.next_begin_offset) {
            return Err(AppError::InconsistentPullResult(format!(
                "max offset {} does not precede next begin offset {}",
                self.max_offset, self.next_begin_offset
            )));
        }
        let span = self
            .max_offset
            .checked_sub(self.min_offset)
            .and_then(|span| span.checked_add(1));
        if span != i64::try_from(self.messages.len()).ok() {
            return Err(AppError::InconsistentPullResult(format!(
                "{} messages pulled for offset range [{}, {}]",
                self.messages.len(),
                self.min_offset,
                self.max_offset
            )));
        }
        Ok(())
    }
}
