use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::message::TagExpression;

use super::{AppError, AppResult};

pub const DEFAULT_PULL_BATCH_SIZE: u32 = 32;
pub const DEFAULT_PULL_TIMEOUT_MS: u64 = 10_000;

fn default_topic_tag() -> String {
    TagExpression::WILDCARD.to_string()
}
fn default_pull_batch_size() -> u32 {
    DEFAULT_PULL_BATCH_SIZE
}
fn default_pull_timeout_ms() -> u64 {
    DEFAULT_PULL_TIMEOUT_MS
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub topic: String,
    /// `*` or tags joined by `||`
    #[serde(default = "default_topic_tag")]
    pub topic_tag: String,
    #[serde(default = "default_pull_batch_size")]
    pub pull_batch_size: u32,
    #[serde(default)]
    pub group_id: String,
    /// Each consumer gets a random instance name unless one is pinned here.
    #[serde(default)]
    pub instance_name: Option<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: String::new(),
            topic_tag: default_topic_tag(),
            pull_batch_size: DEFAULT_PULL_BATCH_SIZE,
            group_id: String::new(),
            instance_name: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerEndpointConfig {
    pub name_server_addr: String,
    #[serde(default = "default_pull_timeout_ms")]
    pub pull_timeout_ms: u64,
}

impl Default for BrokerEndpointConfig {
    fn default() -> Self {
        Self {
            name_server_addr: String::new(),
            pull_timeout_ms: DEFAULT_PULL_TIMEOUT_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// OTLP collector endpoint; spans are only exported when this is set.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
    #[serde(default)]
    pub log_dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpoutConfig {
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub broker: BrokerEndpointConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl SpoutConfig {
    pub fn new(topic: impl Into<String>, topic_tag: impl Into<String>, pull_batch_size: u32) -> Self {
        Self {
            consumer: ConsumerConfig {
                topic: topic.into(),
                topic_tag: topic_tag.into(),
                pull_batch_size,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<SpoutConfig> {
        let path_str = path.as_ref().to_str().ok_or_else(|| {
            AppError::InvalidValue(format!(
                "config file path: {}",
                path.as_ref().to_string_lossy()
            ))
        })?;
        let config = config::Config::builder()
            .add_source(config::File::with_name(path_str))
            .add_source(config::Environment::with_prefix("TXSPOUT").separator("__"))
            .build()?;

        let spout_config: SpoutConfig = config.try_deserialize()?;
        spout_config.validate()?;
        Ok(spout_config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.consumer.topic.trim().is_empty() {
            return Err(AppError::InvalidValue("consumer.topic is empty".to_string()));
        }
        if self.consumer.pull_batch_size == 0 {
            return Err(AppError::InvalidValue(
                "consumer.pull_batch_size must be positive".to_string(),
            ));
        }
        if self.broker.pull_timeout_ms == 0 {
            return Err(AppError::InvalidValue(
                "broker.pull_timeout_ms must be positive".to_string(),
            ));
        }
        self.tag_expression()?;
        Ok(())
    }

    pub fn tag_expression(&self) -> AppResult<TagExpression> {
        TagExpression::parse(Some(&self.consumer.topic_tag))
    }

    /// The pinned instance name, or a fresh random one.
    pub fn instance_name(&self) -> String {
        self.consumer
            .instance_name
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string())
    }
}
