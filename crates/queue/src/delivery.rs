//! apalis-backed [`DeliveryQueue`].

use apalis::prelude::*;
use apalis_redis::RedisStorage;
use async_trait::async_trait;
use fedigate_common::config::RedisConfig;
use fedigate_common::{AppError, AppResult};
use fedigate_federation::{DeliveryJob, DeliveryQueue};
use tracing::{debug, info};

/// Namespace suffix of the delivery storage; prefixed with `redis.prefix`.
pub const DELIVER_NAMESPACE: &str = "deliver";

/// Queues delivery jobs into Redis for the deliver workers.
#[derive(Clone)]
pub struct RedisDeliveryQueue {
    storage: RedisStorage<DeliveryJob>,
}

impl RedisDeliveryQueue {
    /// Wrap an existing storage.
    #[must_use]
    pub const fn new(storage: RedisStorage<DeliveryJob>) -> Self {
        Self { storage }
    }

    /// Connect to Redis and open the delivery storage under
    /// `{prefix}:deliver`.
    pub async fn connect(config: &RedisConfig) -> AppResult<Self> {
        let client = redis::Client::open(config.url.as_str())
            .map_err(|e| AppError::Queue(format!("Invalid Redis URL: {e}")))?;
        let conn = redis::aio::ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to connect to Redis: {e}")))?;

        let namespace = namespace(&config.prefix);
        let storage = RedisStorage::new_with_config(
            conn,
            apalis_redis::Config::default().set_namespace(&namespace),
        );
        info!(namespace = %namespace, "Connected to Redis delivery queue");
        Ok(Self::new(storage))
    }

    /// The underlying storage, for building workers.
    #[must_use]
    pub const fn storage(&self) -> &RedisStorage<DeliveryJob> {
        &self.storage
    }
}

fn namespace(prefix: &str) -> String {
    let prefix = prefix.trim_end_matches(':');
    if prefix.is_empty() {
        DELIVER_NAMESPACE.to_string()
    } else {
        format!("{prefix}:{DELIVER_NAMESPACE}")
    }
}

#[async_trait]
impl DeliveryQueue for RedisDeliveryQueue {
    async fn enqueue(&self, job: DeliveryJob) -> AppResult<()> {
        let inbox = job.inbox_url.clone();
        self.storage
            .clone()
            .push(job)
            .await
            .map_err(|e| AppError::Queue(format!("Failed to queue job: {e}")))?;

        debug!(inbox = %inbox, "Queued delivery job");
        Ok(())
    }
}
