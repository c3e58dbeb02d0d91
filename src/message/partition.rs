use std::borrow::Cow;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{AppError, AppResult};

/// One ordered, append-only message queue of a topic, hosted by one broker.
/// Persisted as its `topic@broker#queue` name.
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Partition {
    pub topic: String,
    pub broker_name: String,
    pub queue_id: i32,
}

impl Display for Partition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}#{}", self.topic, self.broker_name, self.queue_id)
    }
}

impl Partition {
    pub fn new(topic: impl Into<String>, broker_name: impl Into<String>, queue_id: i32) -> Self {
        Self {
            topic: topic.into(),
            broker_name: broker_name.into(),
            queue_id,
        }
    }

    pub fn id(&self) -> String {
        self.to_string()
    }

    /// Parses the `topic@broker#queue` form produced by `Display`.
    pub fn from_string(str_name: Cow<str>) -> AppResult<Self> {
        let invalid = || AppError::InvalidValue(format!("partition name: {}", str_name));
        let (rest, queue_id) = str_name.rsplit_once('#').ok_or_else(invalid)?;
        let (topic, broker_name) = rest.rsplit_once('@').ok_or_else(invalid)?;
        if topic.is_empty() || broker_name.is_empty() {
            return Err(invalid());
        }
        let queue_id = queue_id.parse().map_err(|_| invalid())?;
        Ok(Self::new(topic, broker_name, queue_id))
    }
}

impl TryFrom<String> for Partition {
    type Error = AppError;

    fn try_from(name: String) -> AppResult<Self> {
        Partition::from_string(Cow::Owned(name))
    }
}

impl From<Partition> for String {
    fn from(partition: Partition) -> Self {
        partition.id()
    }
}

/// The partitions of one topic in the order they were first discovered.
///
/// Positions in this set are handed to the host as durable partition keys, so a
/// set is never reordered or extended once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionSet {
    partitions: Arc<[Partition]>,
}

impl PartitionSet {
    pub fn new(partitions: Vec<Partition>) -> Self {
        Self {
            partitions: Arc::from(partitions),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<&Partition> {
        self.partitions.get(position)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Partition> {
        self.partitions.iter()
    }

    /// True when both sets share the same backing storage.
    pub fn same_as(&self, other: &PartitionSet) -> bool {
        Arc::ptr_eq(&self.partitions, &other.partitions)
    }
}

impl<'a> IntoIterator for &'a PartitionSet {
    type Item = &'a Partition;
    type IntoIter = std::slice::Iter<'a, Partition>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Opaque key the host uses for a partition: its position in the topic's
/// [`PartitionSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionHandle(usize);

impl PartitionHandle {
    pub const fn new(position: usize) -> Self {
        Self(position)
    }

    pub fn position(&self) -> usize {
        self.0
    }

    pub fn id(&self) -> String {
        self.0.to_string()
    }

    pub fn from_id(id: &str) -> AppResult<Self> {
        id.parse()
            .map(Self)
            .map_err(|_| AppError::UnknownPartitionHandle(id.to_string()))
    }
}

impl Display for PartitionHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
