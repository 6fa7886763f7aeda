use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::status::JobState;

/// Progress snapshot pushed to interested clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobUpdate {
    pub job_id: String,
    pub state: JobState,
    pub progress: u8,
    pub user_id: Option<i32>,
}

/// Best-effort push channel for job progress.
///
/// Callers log and ignore errors; a failing notifier never affects a job.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, update: &JobUpdate) -> Result<()>;
}

pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _update: &JobUpdate) -> Result<()> {
        Ok(())
    }
}

/// Fans updates out to in-process subscribers (e.g. websocket sessions).
#[derive(Clone)]
pub struct BroadcastNotifier {
    tx: broadcast::Sender<JobUpdate>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobUpdate> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl Notifier for BroadcastNotifier {
    async fn notify(&self, update: &JobUpdate) -> Result<()> {
        // No subscribers is not an error.
        let _ = self.tx.send(update.clone());
        Ok(())
    }
}
