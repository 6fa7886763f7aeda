use std::sync::Arc;

use common::notify::BroadcastNotifier;
use mq::Mq;
use sea_orm::DatabaseConnection;
use worker::WorkerContext;

use crate::config::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    /// Storage, clock and CSV layout shared with the worker pipeline.
    pub ctx: WorkerContext,
    pub mq: Mq,
    pub notifier: Arc<BroadcastNotifier>,
    pub config: Arc<AppConfig>,
}
