pub use batch_metadata::{BatchMetadata, BatchStat};
pub use completion::{BatchCompletion, CompletionHandle, WaitOutcome, WAIT_TIMEOUT};
pub use partition::{Partition, PartitionHandle, PartitionSet};
pub use pull_result::{Message, PullOutcome, PullStatus};
pub use tag_filter::{filter_messages, TagExpression};

mod batch_metadata;
mod completion;
mod partition;
mod pull_result;
mod tag_filter;
