use std::time::Duration;

use common::{JobEnvelope, JobReport, MotionJob};
use mq::{Mq, MqError};
use rand::Rng;
use serde_json::json;
use tracing::{error, info, warn};

use crate::config::WorkerConfig;
use crate::context::WorkerContext;
use crate::download::process_download;
use crate::error::Result;
use crate::jobs::JobTracker;
use crate::upload::process_upload;

/// Retry policy for jobs that fail before producing a report.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u8,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&WorkerConfig::default())
    }
}

impl From<&WorkerConfig> for RetryPolicy {
    fn from(config: &WorkerConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay_ms: config.retry_base_delay_ms,
            max_delay_ms: config.retry_max_delay_ms,
        }
    }
}

/// Exponential backoff with up to 25% jitter, capped at `max_ms`.
pub fn calculate_backoff(attempt: u8, base_ms: u64, max_ms: u64) -> Duration {
    if attempt == 0 {
        return Duration::ZERO;
    }
    let delay_ms = base_ms.saturating_mul(2u64.saturating_pow(u32::from(attempt - 1)));
    let jitter = if delay_ms > 0 {
        rand::rng().random_range(0..=delay_ms / 4)
    } else {
        0
    };
    Duration::from_millis(delay_ms.saturating_add(jitter).min(max_ms))
}

/// Run one job to completion, recording its lifecycle.
///
/// Per-item problems never fail a job; only errors that prevent a report
/// (database or archive trouble) are retried, and the job is marked failed
/// once attempts run out.
pub async fn handle_envelope(
    ctx: &WorkerContext,
    envelope: JobEnvelope,
    policy: RetryPolicy,
) -> Result<()> {
    let tracker = JobTracker::new(ctx, &envelope);
    info!(job_id = %envelope.job_id, job_type = envelope.job.type_name(), "Processing motion job");

    let mut attempt: u8 = 0;
    loop {
        attempt += 1;
        tracker.activate(&envelope).await?;

        match run_job(ctx, &tracker, &envelope.job).await {
            Ok(JobReport::Failed { errors }) => {
                let report = JobReport::Failed { errors };
                tracker.fail("no file could be processed", Some(&report)).await?;
                ctx.audit("motion_job.failed", json!({ "job_id": &envelope.job_id })).await;
                return Ok(());
            }
            Ok(report) => {
                tracker.complete(&report).await?;
                ctx.audit(
                    "motion_job.completed",
                    json!({ "job_id": &envelope.job_id, "type": envelope.job.type_name() }),
                )
                .await;
                info!(job_id = %envelope.job_id, "Motion job completed");
                return Ok(());
            }
            Err(e) if attempt < policy.max_attempts => {
                let delay = calculate_backoff(attempt, policy.base_delay_ms, policy.max_delay_ms);
                warn!(
                    job_id = %envelope.job_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying motion job"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                error!(job_id = %envelope.job_id, attempt, error = %e, "Motion job failed");
                tracker.fail(&e.to_string(), None).await?;
                ctx.audit(
                    "motion_job.failed",
                    json!({ "job_id": &envelope.job_id, "error": e.to_string() }),
                )
                .await;
                return Ok(());
            }
        }
    }
}

/// Consume `queue` until the consumer stops.
pub async fn run_worker(
    ctx: WorkerContext,
    mq: &Mq,
    queue: &str,
    concurrency: usize,
    policy: RetryPolicy,
) -> Result<()> {
    info!(queue, concurrency, "Worker consuming motion jobs");
    mq.process_messages(queue, concurrency.max(1), move |envelope: JobEnvelope| {
        let ctx = ctx.clone();
        async move {
            handle_envelope(&ctx, envelope, policy)
                .await
                .map_err(|e| MqError::Internal(e.to_string()))
        }
    })
    .await?;
    Ok(())
}

async fn run_job(ctx: &WorkerContext, tracker: &JobTracker<'_>, job: &MotionJob) -> Result<JobReport> {
    match job {
        MotionJob::BatchUpload(batch) => process_upload(ctx, tracker, batch)
            .await
            .map(JobReport::BatchUpload),
        MotionJob::BatchDownload(batch) => process_download(ctx, tracker, batch).await,
    }
}
