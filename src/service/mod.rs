pub use app_error::{AppError, AppResult};
pub use config::{
    BrokerEndpointConfig, ConsumerConfig, SpoutConfig, TelemetryConfig, DEFAULT_PULL_BATCH_SIZE,
};
pub use tracing_config::{setup_local_tracing, setup_tracing, TelemetryGuard};

mod app_error;
mod config;
mod tracing_config;
