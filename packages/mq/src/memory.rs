use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{Mutex, Semaphore, mpsc};
use tracing::{error, warn};

use crate::error::MqError;

struct Topic {
    tx: Option<mpsc::UnboundedSender<Value>>,
    rx: Option<mpsc::UnboundedReceiver<Value>>,
}

impl Topic {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx: Some(tx),
            rx: Some(rx),
        }
    }
}

/// In-process queue for single-node deployments and tests.
///
/// Each topic has exactly one consumer. Messages published before the
/// consumer attaches are buffered.
#[derive(Default)]
pub struct MemoryQueue {
    topics: Mutex<HashMap<String, Topic>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn publish<T: Serialize>(&self, queue: &str, message: &T) -> Result<(), MqError> {
        let value = serde_json::to_value(message)?;
        let mut topics = self.topics.lock().await;
        let topic = topics.entry(queue.to_string()).or_insert_with(Topic::new);
        topic
            .tx
            .as_ref()
            .ok_or_else(|| MqError::Internal(format!("queue '{queue}' is closed")))?
            .send(value)
            .map_err(|_| MqError::Internal(format!("queue '{queue}' is closed")))
    }

    /// Consume `queue` until it is closed, running at most `concurrency`
    /// handlers at once.
    pub async fn process_messages<T, F, Fut>(
        &self,
        queue: &str,
        concurrency: usize,
        handler: F,
    ) -> Result<(), MqError>
    where
        T: DeserializeOwned + Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<(), MqError>> + Send + 'static,
    {
        let mut rx = {
            let mut topics = self.topics.lock().await;
            let topic = topics.entry(queue.to_string()).or_insert_with(Topic::new);
            topic
                .rx
                .take()
                .ok_or_else(|| MqError::ConsumerAttached(queue.to_string()))?
        };

        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        while let Some(value) = rx.recv().await {
            let permit = Arc::clone(&permits)
                .acquire_owned()
                .await
                .map_err(|e| MqError::Internal(e.to_string()))?;

            let message: T = match serde_json::from_value(value) {
                Ok(m) => m,
                Err(e) => {
                    warn!(queue, error = %e, "Dropping undecodable message");
                    continue;
                }
            };

            let handler = handler.clone();
            let queue = queue.to_string();
            tokio::spawn(async move {
                let _permit = permit;
                if let Err(e) = handler(message).await {
                    error!(queue = %queue, error = %e, "Message handler failed");
                }
            });
        }
        Ok(())
    }

    /// Drop the sending side so the consumer loop ends once drained.
    /// Later publishes to the queue fail.
    pub async fn close(&self, queue: &str) {
        let mut topics = self.topics.lock().await;
        topics
            .entry(queue.to_string())
            .or_insert_with(Topic::new)
            .tx
            .take();
    }
}
