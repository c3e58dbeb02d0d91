use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use crate::{AppError, AppResult, SpoutConfig};

use super::{BrokerClient, BrokerConnector};

/// The single broker client of an engine.
///
/// The client is built on first [`open`](Self::open); concurrent openers wait
/// on the same initialization and all of them get the same client. Once
/// [`close`](Self::close)d the connection stays closed.
pub struct BrokerConnection<C: BrokerConnector> {
    connector: C,
    config: Arc<SpoutConfig>,
    client: OnceCell<Arc<C::Client>>,
    closed: AtomicBool,
}

impl<C: BrokerConnector> BrokerConnection<C> {
    pub fn new(connector: C, config: Arc<SpoutConfig>) -> Self {
        Self {
            connector,
            config,
            client: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn open(&self) -> AppResult<Arc<C::Client>> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::ConnectionClosed);
        }
        let client = self
            .client
            .get_or_try_init(|| async move {
                let instance_name = self.config.instance_name();
                info!(
                    "connecting broker client {} to {}",
                    instance_name, self.config.broker.name_server_addr
                );
                let client = self.connector.connect(&self.config, &instance_name).await?;
                Ok::<_, AppError>(Arc::new(client))
            })
            .await?;
        Ok(client.clone())
    }

    pub fn is_open(&self) -> bool {
        self.client.initialized() && !self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        match self.client.get() {
            Some(client) => {
                client.shutdown();
                info!("broker client shut down");
            }
            None => debug!("broker connection closed before it was opened"),
        }
    }

    pub fn config(&self) -> &SpoutConfig {
        &self.config
    }
}
