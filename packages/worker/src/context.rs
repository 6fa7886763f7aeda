use std::path::PathBuf;
use std::sync::Arc;

use common::audit::{AuditLog, TracingAuditLog};
use common::motion::DeviceClock;
use common::notify::{JobUpdate, NoopNotifier, Notifier};
use common::storage::StorageRegistry;
use sea_orm::DatabaseConnection;
use serde_json::Value;
use tracing::warn;

use crate::config::WorkerAppConfig;
use crate::csv::CsvColumns;
use crate::database::init_db;
use crate::error::{Result, WorkerError};

/// Shared handles every job needs.
#[derive(Clone)]
pub struct WorkerContext {
    pub db: DatabaseConnection,
    pub storage: Arc<StorageRegistry>,
    pub clock: DeviceClock,
    pub columns: Arc<CsvColumns>,
    /// Directory receiving download archives.
    pub results_dir: PathBuf,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditLog>,
}

impl WorkerContext {
    pub fn new(db: DatabaseConnection, storage: Arc<StorageRegistry>, results_dir: PathBuf) -> Self {
        Self {
            db,
            storage,
            clock: DeviceClock::utc(),
            columns: Arc::new(CsvColumns::all_fields()),
            results_dir,
            notifier: Arc::new(NoopNotifier),
            audit: Arc::new(TracingAuditLog),
        }
    }

    pub async fn from_config(config: &WorkerAppConfig) -> Result<Self> {
        let db = init_db(&config.database).await?;
        let storage = StorageRegistry::from_config(&config.storage).await?;
        let mut ctx = Self::new(db, Arc::new(storage), config.motion.results_dir.clone().into());
        ctx.clock = DeviceClock::from_offset_minutes(config.motion.device_utc_offset_minutes)
            .ok_or_else(|| {
                WorkerError::InvalidConfig(format!(
                    "device_utc_offset_minutes {} is out of range",
                    config.motion.device_utc_offset_minutes
                ))
            })?;
        if let Some(path) = &config.motion.format_path {
            ctx.columns = Arc::new(CsvColumns::load(path).await?);
        }
        Ok(ctx)
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditLog>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_clock(mut self, clock: DeviceClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_columns(mut self, columns: CsvColumns) -> Self {
        self.columns = Arc::new(columns);
        self
    }

    /// Push a progress update. Failures are logged and dropped.
    pub async fn notify(&self, update: JobUpdate) {
        if let Err(e) = self.notifier.notify(&update).await {
            warn!(job_id = %update.job_id, error = %e, "Job notification failed");
        }
    }

    /// Record an audit event. Failures are logged and dropped.
    pub async fn audit(&self, event: &str, details: Value) {
        if let Err(e) = self.audit.record(event, details).await {
            warn!(event, error = %e, "Audit record failed");
        }
    }
}
