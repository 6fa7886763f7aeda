use std::future::Future;

use broccoli_queue::brokers::broker::BrokerMessage;
use broccoli_queue::error::BroccoliError;
use broccoli_queue::queue::BroccoliQueue;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::MqError;

/// Redis-backed queue shared by every server and worker process.
pub struct RedisQueue {
    inner: BroccoliQueue,
}

impl RedisQueue {
    pub async fn connect(url: &str, pool_size: u8) -> Result<Self, MqError> {
        let inner = BroccoliQueue::builder(url)
            .pool_connections(pool_size)
            .build()
            .await?;
        Ok(Self { inner })
    }

    pub async fn publish<T>(&self, queue: &str, message: &T) -> Result<(), MqError>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        self.inner.publish(queue, None, message, None).await?;
        Ok(())
    }

    /// Failed handlers are reported back to the broker, which owns redelivery.
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
        self.inner
            .process_messages(
                queue,
                Some(concurrency),
                None,
                move |message: BrokerMessage<T>| {
                    let handler = handler.clone();
                    async move {
                        handler(message.payload)
                            .await
                            .map_err(|e| BroccoliError::Job(e.to_string()))
                    }
                },
            )
            .await?;
        Ok(())
    }
}
