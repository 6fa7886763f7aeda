use std::future::Future;
use std::sync::Arc;

use common::config::{MqAppConfig, MqBackend};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::MqError;
use crate::memory::MemoryQueue;
use crate::redis::RedisQueue;

/// Queue handle shared by producers and consumers.
#[derive(Clone)]
pub enum Mq {
    Redis(Arc<RedisQueue>),
    Memory(Arc<MemoryQueue>),
}

impl Mq {
    pub async fn connect(config: &MqAppConfig) -> Result<Self, MqError> {
        match config.backend {
            MqBackend::Redis => {
                let queue = RedisQueue::connect(&config.url, config.pool_size).await?;
                info!(url = %config.url, "Connected to Redis queue");
                Ok(Self::Redis(Arc::new(queue)))
            }
            MqBackend::Memory => {
                info!("Using in-process queue");
                Ok(Self::memory())
            }
        }
    }

    pub fn memory() -> Self {
        Self::Memory(Arc::new(MemoryQueue::new()))
    }

    pub fn is_memory(&self) -> bool {
        matches!(self, Self::Memory(_))
    }

    pub async fn publish<T>(&self, queue: &str, message: &T) -> Result<(), MqError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        match self {
            Self::Redis(mq) => mq.publish(queue, message).await,
            Self::Memory(mq) => mq.publish(queue, message).await,
        }
    }

    /// Run `handler` for every message on `queue`. Returns when the
    /// consumer stops.
    pub async fn process_messages<T, F, Fut>(
        &self,
        queue: &str,
        concurrency: usize,
        handler: F,
    ) -> Result<(), MqError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), MqError>> + Send + 'static,
    {
        match self {
            Self::Redis(mq) => mq.process_messages(queue, concurrency, handler).await,
            Self::Memory(mq) => mq.process_messages(queue, concurrency, handler).await,
        }
    }

    /// Stop accepting messages on `queue`. Only meaningful for the
    /// in-process backend.
    pub async fn close(&self, queue: &str) {
        if let Self::Memory(mq) = self {
            mq.close(queue).await;
        }
    }
}
