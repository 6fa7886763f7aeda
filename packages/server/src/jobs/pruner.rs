use std::time::Duration;

use common::config::JobRetentionConfig;
use sea_orm::DatabaseConnection;
use tracing::{error, info};

use super::JobService;

/// Run the job retention pass as a background task.
pub async fn run_job_pruner(db: DatabaseConnection, config: JobRetentionConfig) {
    info!(
        keep_completed = config.keep_completed,
        keep_failed = config.keep_failed,
        ttl_secs = config.ttl_secs,
        "Starting job pruner"
    );

    let mut interval = tokio::time::interval(Duration::from_secs(config.prune_interval_secs.max(1)));

    loop {
        interval.tick().await;

        match JobService::new(&db).prune(&config).await {
            Ok(summary) if summary.jobs > 0 => {
                info!(jobs = summary.jobs, archives = summary.archives, "Pruned finished jobs")
            }
            Ok(_) => {}
            Err(e) => error!(error = %e, "Job pruning failed"),
        }
    }
}
