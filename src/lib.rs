pub mod broker;
pub mod message;
pub mod service;
pub mod spout;

pub use broker::{BrokerClient, BrokerConnector, MemoryBroker};
pub use message::{BatchMetadata, Message, Partition, PartitionHandle, PartitionSet};
pub use service::{
    setup_local_tracing, setup_tracing, AppError, AppResult, SpoutConfig, TelemetryGuard,
};
pub use spout::{
    BatchCoordinator, Coordinator, Emitter, PullEngine, QueueRegistry, SpoutTuple,
    TransactionAttempt, TransactionalSpout, TupleCollector,
};
